//! Relay worker configuration

use std::str::FromStr;
use std::time::Duration;

/// What happens to a record once it has been delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Mark it `Processed` and keep it for audit
    #[default]
    Retain,

    /// Hard-delete it
    Delete,
}

impl FromStr for CompletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "delete" => Ok(Self::Delete),
            other => Err(format!(
                "unknown completion policy '{other}' (expected 'retain' or 'delete')"
            )),
        }
    }
}

/// Relay worker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Sleep between polls when the last batch was not full
    pub poll_interval: Duration,

    /// Maximum records claimed per poll
    pub batch_size: usize,

    /// Publishes in flight at once within a batch
    pub max_concurrency: usize,

    /// Upper bound on a single publish call
    pub publish_timeout: Duration,

    pub completion: CompletionPolicy,

    /// Age after which processed records are purged; `None` keeps them
    pub retention: Option<Duration>,

    /// How often the retention purge runs
    pub purge_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            max_concurrency: 1,
            publish_timeout: Duration::from_secs(10),
            completion: CompletionPolicy::Retain,
            retention: None,
            purge_interval: Duration::from_secs(3600),
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency.max(1);
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_completion(mut self, completion: CompletionPolicy) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }
}
