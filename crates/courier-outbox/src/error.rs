//! Error types for outbox storage, units of work, and publishing

use std::time::Duration;

use uuid::Uuid;

/// Error type for store and unit-of-work operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with this id in the expected state
    #[error("outbox record not found: {0}")]
    NotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Payload could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A domain repository rejected the operation
    #[error("domain error: {0}")]
    Domain(String),

    /// A concurrent transaction committed a conflicting write first
    #[error("conflict: {0}")]
    Conflict(String),

    /// A status column held an unknown value
    #[error("invalid outbox status: {0}")]
    InvalidStatus(String),

    /// The unit of work failed and rolling back failed too
    #[error("{original}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        original: Box<StoreError>,
        rollback: String,
    },
}

impl StoreError {
    /// Create a domain error
    pub fn domain(msg: impl Into<String>) -> Self {
        StoreError::Domain(msg.into())
    }

    /// The error that triggered a rollback, or `self` when no rollback was involved
    pub fn original(&self) -> &StoreError {
        match self {
            StoreError::RollbackFailed { original, .. } => original.original(),
            other => other,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Error returned by an [`EventPublisher`](crate::publisher::EventPublisher)
///
/// The relay treats every variant as retryable; the variant and message end up
/// in the record's `last_error`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("broker rejected message (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("message encoding error: {0}")]
    Encoding(String),
}
