//! In-memory implementation of OutboxRepository for testing

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::postgres::DEFAULT_CLAIM_LEASE;
use super::store::OutboxRepository;
use crate::backoff::BackoffPolicy;
use crate::error::StoreError;
use crate::model::{EnqueueOutcome, NewOutboxEvent, OutboxRecord, OutboxStatus, StatusCounts};

/// In-memory implementation of OutboxRepository
///
/// Mirrors the PostgreSQL semantics (dedupe, claim ordering, claim lease,
/// pending-only updates) without a database.
///
/// # Example
///
/// ```
/// use courier_outbox::InMemoryOutboxRepository;
///
/// let repository = InMemoryOutboxRepository::new();
/// assert!(repository.is_empty());
/// ```
pub struct InMemoryOutboxRepository {
    records: RwLock<HashMap<Uuid, OutboxRecord>>,
    backoff: BackoffPolicy,
    claim_lease: Duration,
}

impl Default for InMemoryOutboxRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            backoff: BackoffPolicy::default(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Get the number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All records, oldest first
    pub fn snapshot(&self) -> Vec<OutboxRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    /// Whether a record already uses this dedupe key
    pub(crate) fn has_dedupe_key(&self, key: &str) -> bool {
        self.records
            .read()
            .values()
            .any(|r| r.dedupe_key.as_deref() == Some(key))
    }

    /// Apply a staged transaction: run `apply` and insert `events` under one
    /// write lock
    ///
    /// Nothing is applied if another transaction committed one of the dedupe
    /// keys after it was staged.
    pub(crate) fn commit_staged(
        &self,
        events: &[NewOutboxEvent],
        apply: impl FnOnce(),
    ) -> Result<(), StoreError> {
        let mut records = self.records.write();

        for key in events.iter().filter_map(|e| e.dedupe_key.as_deref()) {
            if records.values().any(|r| r.dedupe_key.as_deref() == Some(key)) {
                return Err(StoreError::Conflict(format!(
                    "dedupe key committed by a concurrent transaction: {key}"
                )));
            }
        }

        apply();
        for event in events {
            records.insert(event.id, event.clone().into_record());
        }
        Ok(())
    }

    /// Insert unless the dedupe key is taken
    fn insert(&self, event: &NewOutboxEvent) -> EnqueueOutcome {
        let mut records = self.records.write();

        if let Some(key) = event.dedupe_key.as_deref() {
            if records.values().any(|r| r.dedupe_key.as_deref() == Some(key)) {
                return EnqueueOutcome::Duplicate;
            }
        }

        records.insert(event.id, event.clone().into_record());
        EnqueueOutcome::Inserted(event.id)
    }
}

fn lease_until(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn create_event(&self, event: &NewOutboxEvent) -> Result<EnqueueOutcome, StoreError> {
        Ok(self.insert(event))
    }

    async fn fetch_pending_events(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let now = Utc::now();
        let mut records = self.records.write();

        let mut due: Vec<_> = records
            .values()
            .filter(|r| r.status == OutboxStatus::Pending && r.available_at <= now)
            .map(|r| (r.available_at, r.created_at, r.id))
            .collect();
        due.sort();
        due.truncate(limit);

        let leased_until = lease_until(now, self.claim_lease);
        let mut claimed = Vec::with_capacity(due.len());
        for (_, _, id) in due {
            if let Some(record) = records.get_mut(&id) {
                claimed.push(record.clone());
                record.available_at = leased_until;
            }
        }

        Ok(claimed)
    }

    fn claim_lease(&self) -> Duration {
        self.claim_lease
    }

    async fn update_event(
        &self,
        id: Uuid,
        status: OutboxStatus,
        retry_count: u32,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&id)
            .filter(|r| r.status == OutboxStatus::Pending)
            .ok_or(StoreError::NotFound(id))?;

        let now = Utc::now();
        record.status = status;
        record.retry_count = retry_count;
        record.last_error = last_error.map(str::to_string);

        match status {
            OutboxStatus::Pending => {
                record.available_at = lease_until(now, self.backoff.delay(retry_count));
                record.processed_at = None;
            }
            OutboxStatus::Processed => record.processed_at = Some(now),
            OutboxStatus::Failed => record.processed_at = None,
        }

        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> Result<(), StoreError> {
        self.records
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| {
            !(r.status == OutboxStatus::Processed
                && r.processed_at.is_some_and(|at| at < older_than))
        });
        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }

    async fn list_failed(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut failed: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.status == OutboxStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(failed.into_iter().skip(offset).take(limit).collect())
    }

    async fn requeue_failed(&self, id: Uuid) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&id)
            .filter(|r| r.status == OutboxStatus::Failed)
            .ok_or(StoreError::NotFound(id))?;

        record.status = OutboxStatus::Pending;
        record.retry_count = 0;
        record.available_at = Utc::now();
        record.processed_at = None;
        Ok(())
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for record in self.records.read().values() {
            counts.add(record.status, 1);
        }
        Ok(counts)
    }
}
