//! PostgreSQL implementation of OutboxRepository
//!
//! - Idempotent enqueue via `ON CONFLICT (dedupe_key) DO NOTHING`
//! - Competing-consumer claims with `FOR UPDATE SKIP LOCKED` plus a lease
//! - Outcome updates guarded by `status = 'PENDING'`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgExecutor, PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{OutboxRepository, OutboxWriter};
use crate::backoff::BackoffPolicy;
use crate::error::StoreError;
use crate::model::{EnqueueOutcome, NewOutboxEvent, OutboxRecord, OutboxStatus, StatusCounts};

/// How long a claimed record stays invisible to other claimers
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(60);

const RECORD_COLUMNS: &str = "id, entity_type, entity_id, topic, event_type, payload, status, \
     retry_count, max_retries, last_error, dedupe_key, available_at, processed_at, created_at";

/// PostgreSQL implementation of OutboxRepository
///
/// # Example
///
/// ```ignore
/// use courier_outbox::PgOutboxRepository;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let repository = PgOutboxRepository::new(pool);
/// ```
#[derive(Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
    backoff: BackoffPolicy,
    claim_lease: Duration,
}

impl PgOutboxRepository {
    /// Create a repository with default backoff and claim lease
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            backoff: BackoffPolicy::default(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// A claim lease longer than the publish timeout keeps an in-flight record
    /// from being claimed twice
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Insert an event through any executor (pool or open transaction)
async fn insert_event<'e, E>(
    executor: E,
    event: &NewOutboxEvent,
) -> Result<EnqueueOutcome, StoreError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO outbox_events (
            id, entity_type, entity_id, topic, event_type, payload,
            status, retry_count, max_retries, dedupe_key, available_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', 0, $7, $8, COALESCE($9, $10), $10)
        ON CONFLICT (dedupe_key) WHERE dedupe_key IS NOT NULL DO NOTHING
        "#,
    )
    .bind(event.id)
    .bind(&event.entity_type)
    .bind(event.entity_id)
    .bind(&event.topic)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(to_db_int(event.max_retries))
    .bind(&event.dedupe_key)
    .bind(event.available_at)
    .bind(event.created_at)
    .execute(executor)
    .await
    .map_err(|e| {
        error!("Failed to insert outbox event: {}", e);
        StoreError::Database(e.to_string())
    })?;

    if result.rows_affected() == 0 {
        debug!(
            dedupe_key = event.dedupe_key.as_deref().unwrap_or_default(),
            event_type = %event.event_type,
            "duplicate outbox event ignored"
        );
        return Ok(EnqueueOutcome::Duplicate);
    }

    debug!(outbox_id = %event.id, topic = %event.topic, event_type = %event.event_type, "enqueued outbox event");
    Ok(EnqueueOutcome::Inserted(event.id))
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn create_event(&self, event: &NewOutboxEvent) -> Result<EnqueueOutcome, StoreError> {
        insert_event(&self.pool, event).await
    }

    #[instrument(skip(self))]
    async fn fetch_pending_events(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        // Lock due rows (skipping rows another claimer holds), then push their
        // available_at out by the lease so they stay hidden after commit.
        // Callers see the available_at the row had when it was claimed.
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT id, available_at AS due_at
                FROM outbox_events
                WHERE status = 'PENDING'
                  AND available_at <= NOW()
                ORDER BY available_at, created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ),
            claimed AS (
                UPDATE outbox_events o
                SET available_at = NOW() + make_interval(secs => $2)
                FROM due
                WHERE o.id = due.id
                RETURNING o.id, o.entity_type, o.entity_id, o.topic, o.event_type,
                          o.payload, o.status, o.retry_count, o.max_retries,
                          o.last_error, o.dedupe_key, due.due_at AS available_at,
                          o.processed_at, o.created_at
            )
            SELECT * FROM claimed
            ORDER BY available_at, created_at
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(self.claim_lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim outbox events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(claimed = records.len(), "claimed outbox events");
        Ok(records)
    }

    fn claim_lease(&self) -> Duration {
        self.claim_lease
    }

    #[instrument(skip(self, last_error))]
    async fn update_event(
        &self,
        id: Uuid,
        status: OutboxStatus,
        retry_count: u32,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = match status {
            OutboxStatus::Pending => {
                let delay = self.backoff.delay(retry_count);
                sqlx::query(
                    r#"
                    UPDATE outbox_events
                    SET retry_count = $2,
                        last_error = $3,
                        available_at = NOW() + make_interval(secs => $4),
                        processed_at = NULL
                    WHERE id = $1 AND status = 'PENDING'
                    "#,
                )
                .bind(id)
                .bind(to_db_int(retry_count))
                .bind(last_error)
                .bind(delay.as_secs_f64())
                .execute(&self.pool)
                .await
            }
            OutboxStatus::Processed | OutboxStatus::Failed => {
                sqlx::query(
                    r#"
                    UPDATE outbox_events
                    SET status = $2,
                        retry_count = $3,
                        last_error = $4,
                        processed_at = CASE WHEN $2 = 'PROCESSED' THEN NOW() ELSE NULL END
                    WHERE id = $1 AND status = 'PENDING'
                    "#,
                )
                .bind(id)
                .bind(status.as_str())
                .bind(to_db_int(retry_count))
                .bind(last_error)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| {
            error!("Failed to update outbox event: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        debug!(outbox_id = %id, %status, retry_count, "updated outbox event");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_event(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM outbox_events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete outbox event: {}", e);
                StoreError::Database(e.to_string())
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        debug!(outbox_id = %id, "deleted outbox event");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_event(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get outbox event: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE status = 'PROCESSED' AND processed_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to purge processed outbox events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn list_failed(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM outbox_events
            WHERE status = 'FAILED'
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list failed outbox events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn requeue_failed(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PENDING',
                retry_count = 0,
                available_at = NOW(),
                processed_at = NULL
            WHERE id = $1 AND status = 'FAILED'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to requeue outbox event: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        debug!(outbox_id = %id, "requeued failed outbox event");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM outbox_events
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count outbox events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.add(status.parse()?, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}

/// Enqueue on a connection, typically one inside an open transaction
#[async_trait]
impl OutboxWriter for PgConnection {
    async fn create_event(
        &mut self,
        event: &NewOutboxEvent,
    ) -> Result<EnqueueOutcome, StoreError> {
        insert_event(&mut *self, event).await
    }
}

fn record_from_row(row: &PgRow) -> Result<OutboxRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let retry_count: i32 = row.try_get("retry_count")?;
    let max_retries: i32 = row.try_get("max_retries")?;

    Ok(OutboxRecord {
        id: row.try_get("id")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        topic: row.try_get("topic")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status: status.parse()?,
        retry_count: from_db_int(retry_count),
        max_retries: from_db_int(max_retries),
        last_error: row.try_get("last_error")?,
        dedupe_key: row.try_get("dedupe_key")?,
        available_at: row.try_get("available_at")?,
        processed_at: row.try_get("processed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn to_db_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn from_db_int(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
