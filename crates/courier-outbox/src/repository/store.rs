//! OutboxRepository trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{EnqueueOutcome, NewOutboxEvent, OutboxRecord, OutboxStatus, StatusCounts};

/// Storage backend for outbox records
///
/// Producer operations enqueue; consumer operations claim due records and
/// record the delivery outcome. Implementations must be thread-safe and
/// support concurrent claimers.
#[async_trait]
pub trait OutboxRepository: Send + Sync + 'static {
    // =========================================================================
    // Producer
    // =========================================================================

    /// Insert an event outside any caller transaction
    ///
    /// A non-null dedupe key that already exists makes this a no-op returning
    /// [`EnqueueOutcome::Duplicate`].
    async fn create_event(&self, event: &NewOutboxEvent) -> Result<EnqueueOutcome, StoreError>;

    // =========================================================================
    // Consumer
    // =========================================================================

    /// Claim up to `limit` due pending records, oldest `available_at` first
    ///
    /// Concurrent callers receive disjoint sets for as long as the claim lease
    /// lasts.
    async fn fetch_pending_events(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Record a delivery outcome
    ///
    /// `Processed` and `Failed` are terminal and stamp `processed_at` for
    /// `Processed`. `Pending` schedules a redelivery after a backoff derived
    /// from `retry_count`. Only pending records can be updated; anything else
    /// is [`StoreError::NotFound`].
    async fn update_event(
        &self,
        id: Uuid,
        status: OutboxStatus,
        retry_count: u32,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// How long a claimed record stays hidden from other claimers
    fn claim_lease(&self) -> Duration;

    /// Hard-delete a record
    async fn delete_event(&self, id: Uuid) -> Result<(), StoreError>;

    // =========================================================================
    // Operations
    // =========================================================================

    /// Look up a single record
    async fn get_event(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError>;

    /// Delete processed records whose `processed_at` is before `older_than`
    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Dead letters, newest first
    async fn list_failed(&self, limit: usize, offset: usize)
        -> Result<Vec<OutboxRecord>, StoreError>;

    /// Move a failed record back to pending with a fresh retry budget
    async fn requeue_failed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Number of records per status
    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;
}

/// Enqueue handle bound to an open transaction
///
/// Handed out by a [`TransactionScope`](crate::uow::TransactionScope); the
/// insert commits or rolls back with the surrounding domain write.
#[async_trait]
pub trait OutboxWriter: Send {
    async fn create_event(&mut self, event: &NewOutboxEvent)
        -> Result<EnqueueOutcome, StoreError>;
}
