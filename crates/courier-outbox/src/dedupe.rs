//! Dedupe keys for idempotent enqueue
//!
//! A key must be a pure function of the triggering operation's identity, so a
//! retried request computes the same key and the second insert is a no-op.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Idempotency key stored in `outbox_events.dedupe_key`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey(String);

impl DedupeKey {
    /// One event per write: `<kind>:<event_type>:<entity_id>:<unix nanos>`
    ///
    /// `kind` is lowercased. Timestamps outside the nanosecond range fall back
    /// to microsecond precision.
    pub fn per_write(
        entity_kind: &str,
        event_type: &str,
        entity_id: Uuid,
        at: DateTime<Utc>,
    ) -> Self {
        let nanos = at
            .timestamp_nanos_opt()
            .map(i128::from)
            .unwrap_or_else(|| i128::from(at.timestamp_micros()) * 1_000);
        Self(format!(
            "{}:{}:{}:{}",
            entity_kind.to_lowercase(),
            event_type,
            entity_id,
            nanos
        ))
    }

    /// One event per message: `<kind>:<event_type>:<message_id>`
    pub fn per_message(entity_kind: &str, event_type: &str, message_id: Uuid) -> Self {
        Self(format!(
            "{}:{}:{}",
            entity_kind.to_lowercase(),
            event_type,
            message_id
        ))
    }

    /// One event per entity, whatever the operation
    pub fn per_entity(entity_id: Uuid) -> Self {
        Self(entity_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DedupeKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for DedupeKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<DedupeKey> for String {
    fn from(key: DedupeKey) -> Self {
        key.0
    }
}
