//! Outbox record types

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dedupe::DedupeKey;
use crate::error::StoreError;

/// Retry ceiling used when the caller does not pick one
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Lifecycle state of an outbox record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Eligible for delivery once `available_at` has passed
    Pending,

    /// Delivered to the broker
    Processed,

    /// Retry budget exhausted (dead letter)
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        }
    }

    /// Terminal records are never picked up by the relay again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSED" => Ok(Self::Processed),
            "FAILED" => Ok(Self::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A persisted outbox row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub topic: String,
    pub event_type: String,
    /// Serialized event body, opaque to the relay
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub dedupe_key: Option<String>,
    pub available_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Message body as sent to the broker
    pub fn payload_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.payload)
    }

    /// Whether one more failed attempt moves this record to `Failed`
    pub fn exhausted_after_failure(&self) -> bool {
        self.retry_count + 1 > self.max_retries
    }
}

/// An event to enqueue, built by the producing domain operation
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub topic: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub max_retries: u32,
    pub dedupe_key: Option<String>,
    /// Earliest delivery time; `None` means immediately
    pub available_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    /// Serialize `payload` into a new event
    ///
    /// A payload that cannot be serialized is a [`StoreError::Serialization`];
    /// returning it from a unit of work aborts the domain write with it.
    pub fn new<P: Serialize + ?Sized>(
        entity_type: impl Into<String>,
        entity_id: Uuid,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: &P,
    ) -> Result<Self, StoreError> {
        let payload = serde_json::to_value(payload)?;

        Ok(Self {
            id: Uuid::now_v7(),
            entity_type: entity_type.into(),
            entity_id,
            topic: topic.into(),
            event_type: event_type.into(),
            payload,
            max_retries: DEFAULT_MAX_RETRIES,
            dedupe_key: None,
            available_at: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_dedupe_key(mut self, key: impl Into<DedupeKey>) -> Self {
        self.dedupe_key = Some(key.into().into_string());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Hold the event back until `at`
    pub fn available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = Some(at);
        self
    }

    /// Hold the event back for `delay` after creation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        self.available_at = self.created_at.checked_add_signed(delay);
        self
    }

    /// Materialize the row written at enqueue time
    pub fn into_record(self) -> OutboxRecord {
        OutboxRecord {
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            topic: self.topic,
            event_type: self.event_type,
            payload: self.payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            last_error: None,
            dedupe_key: self.dedupe_key,
            available_at: self.available_at.unwrap_or(self.created_at),
            processed_at: None,
            created_at: self.created_at,
        }
    }
}

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new row was written
    Inserted(Uuid),

    /// A row with the same dedupe key already exists; nothing was written
    Duplicate,
}

impl EnqueueOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// Row counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processed + self.failed
    }

    pub(crate) fn add(&mut self, status: OutboxStatus, count: u64) {
        match status {
            OutboxStatus::Pending => self.pending += count,
            OutboxStatus::Processed => self.processed += count,
            OutboxStatus::Failed => self.failed += count,
        }
    }
}
