//! Redelivery backoff policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Smallest delay ever returned, so a retried record is always due strictly
/// after the failed attempt
pub const MIN_DELAY: Duration = Duration::from_millis(1);

/// How far to push `available_at` after a failed publish
///
/// Exponential backoff with a cap and jitter.
///
/// # Example
///
/// ```
/// use courier_outbox::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential()
///     .with_initial_interval(Duration::from_secs(1))
///     .with_max_interval(Duration::from_secs(60))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.delay(1), Duration::from_secs(1));
/// assert_eq!(policy.delay(2), Duration::from_secs(2));
/// assert_eq!(policy.delay(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound before jitter
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor per failure
    pub multiplier: f64,

    /// Jitter factor (0.0-1.0); 0.1 means ±10%
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl BackoffPolicy {
    /// 1s initial, 5min cap, 2x growth, 10% jitter
    pub fn exponential() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Same delay after every failure
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt, given the retry count after the failure
    /// (1 after the first failure)
    pub fn delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..=range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::try_from_secs_f64(jittered)
            .unwrap_or(self.max_interval)
            .max(MIN_DELAY)
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = BackoffPolicy::exponential();
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(300));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = BackoffPolicy::exponential().with_jitter(0.0);

        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = BackoffPolicy::exponential()
            .with_max_interval(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.delay(10), Duration::from_secs(5));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = BackoffPolicy::exponential().with_jitter(0.5);

        for _ in 0..100 {
            let delay = policy.delay(3);
            assert!(delay >= Duration::from_secs(2), "{delay:?}");
            assert!(delay <= Duration::from_secs(6), "{delay:?}");
        }
    }

    #[test]
    fn test_delay_is_never_zero() {
        let policy = BackoffPolicy::fixed(Duration::ZERO);
        assert_eq!(policy.delay(1), MIN_DELAY);
        assert_eq!(policy.delay(0), MIN_DELAY);
    }

    #[test]
    fn test_fixed_interval() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(7), Duration::from_millis(250));
    }

    #[test]
    fn test_serialization() {
        let policy = BackoffPolicy::exponential().with_multiplier(3.0);

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: BackoffPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }
}
