//! Relay configuration from environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | required |
//! | `DATABASE_MAX_CONNECTIONS` | 10 |
//! | `OUTBOX_POLL_INTERVAL_MS` | 1000 |
//! | `OUTBOX_BATCH_SIZE` | 50 |
//! | `OUTBOX_MAX_CONCURRENCY` | 1 |
//! | `OUTBOX_PUBLISH_TIMEOUT_MS` | 10000 |
//! | `OUTBOX_CLAIM_LEASE_MS` | 60000 |
//! | `OUTBOX_COMPLETION_POLICY` | `retain` (or `delete`) |
//! | `OUTBOX_RETENTION_HOURS` | unset, processed records are kept |
//! | `OUTBOX_PURGE_INTERVAL_SECS` | 3600 |
//! | `OUTBOX_BACKOFF_INITIAL_MS` | 1000 |
//! | `OUTBOX_BACKOFF_MAX_MS` | 300000 |
//! | `OUTBOX_BACKOFF_MULTIPLIER` | 2.0 |
//! | `OUTBOX_BACKOFF_JITTER` | 0.1 |
//! | `OUTBOX_RUN_MIGRATIONS` | true |
//! | `PUBSUB_PROJECT_ID` | required |
//! | `PUBSUB_EMULATOR_HOST` | unset |
//! | `PUBSUB_ENDPOINT` | `https://pubsub.googleapis.com` |
//! | `PUBSUB_ACCESS_TOKEN` | unset |
//! | `LOG_FORMAT` | text (`json` for JSON lines) |

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use courier_outbox::{BackoffPolicy, CompletionPolicy, RelayConfig};

use crate::pubsub::{PubSubConfig, DEFAULT_PUBSUB_ENDPOINT};
use crate::telemetry::LogFormat;

/// Everything the relay process needs
#[derive(Clone)]
pub struct RelaySettings {
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub claim_lease: Duration,
    pub relay: RelayConfig,
    pub backoff: BackoffPolicy,
    pub pubsub: PubSubConfig,
    pub log_format: LogFormat,
}

impl RelaySettings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`; unset and empty values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").context("DATABASE_URL is required")?;
        let project_id = get("PUBSUB_PROJECT_ID").context("PUBSUB_PROJECT_ID is required")?;

        let mut relay = RelayConfig::default()
            .with_poll_interval(millis(&get, "OUTBOX_POLL_INTERVAL_MS", 1000)?)
            .with_batch_size(parse(&get, "OUTBOX_BATCH_SIZE", 50)?)
            .with_max_concurrency(parse(&get, "OUTBOX_MAX_CONCURRENCY", 1)?)
            .with_publish_timeout(millis(&get, "OUTBOX_PUBLISH_TIMEOUT_MS", 10_000)?)
            .with_completion(parse(&get, "OUTBOX_COMPLETION_POLICY", CompletionPolicy::Retain)?)
            .with_purge_interval(Duration::from_secs(parse(
                &get,
                "OUTBOX_PURGE_INTERVAL_SECS",
                3600,
            )?));
        if let Some(hours) = get("OUTBOX_RETENTION_HOURS") {
            let hours: u64 = parse_value("OUTBOX_RETENTION_HOURS", &hours)?;
            relay = relay.with_retention(Duration::from_secs(hours.saturating_mul(3600)));
        }

        let claim_lease = millis(&get, "OUTBOX_CLAIM_LEASE_MS", 60_000)?;
        if claim_lease <= relay.publish_timeout {
            bail!(
                "OUTBOX_CLAIM_LEASE_MS ({}ms) must be longer than OUTBOX_PUBLISH_TIMEOUT_MS ({}ms)",
                claim_lease.as_millis(),
                relay.publish_timeout.as_millis()
            );
        }

        let jitter: f64 = parse(&get, "OUTBOX_BACKOFF_JITTER", 0.1)?;
        if !(0.0..=1.0).contains(&jitter) {
            bail!("OUTBOX_BACKOFF_JITTER must be between 0 and 1, got {jitter}");
        }
        let backoff = BackoffPolicy::exponential()
            .with_initial_interval(millis(&get, "OUTBOX_BACKOFF_INITIAL_MS", 1000)?)
            .with_max_interval(millis(&get, "OUTBOX_BACKOFF_MAX_MS", 300_000)?)
            .with_multiplier(parse(&get, "OUTBOX_BACKOFF_MULTIPLIER", 2.0)?)
            .with_jitter(jitter);

        let pubsub = match get("PUBSUB_EMULATOR_HOST") {
            Some(host) => PubSubConfig::emulator(project_id, &host),
            None => PubSubConfig {
                endpoint: get("PUBSUB_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_PUBSUB_ENDPOINT.to_string()),
                access_token: get("PUBSUB_ACCESS_TOKEN"),
                ..PubSubConfig::new(project_id)
            },
        }
        .with_request_timeout(relay.publish_timeout);

        Ok(Self {
            database_url,
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            run_migrations: parse(&get, "OUTBOX_RUN_MIGRATIONS", true)?,
            claim_lease,
            relay,
            backoff,
            pubsub,
            log_format: LogFormat::from_setting(get("LOG_FORMAT").as_deref()),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("invalid value for {name} ({raw:?}): {e}"))
}

fn millis(get: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<Duration> {
    parse(get, name, default).map(Duration::from_millis)
}
