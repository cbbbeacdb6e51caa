//! Polling relay loop

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::config::{CompletionPolicy, RelayConfig};
use crate::error::{PublishError, StoreError};
use crate::model::{OutboxRecord, OutboxStatus};
use crate::publisher::EventPublisher;
use crate::repository::OutboxRepository;

/// What one poll cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Outcomes that could not be written back; those records reappear after
    /// the claim lease
    pub store_errors: usize,
    /// Records left unpublished because too little of the claim lease was
    /// left for another attempt; they reappear once the lease runs out
    pub lease_expired: usize,
}

impl TickReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Retried => self.retried += 1,
            Delivery::DeadLettered => self.dead_lettered += 1,
            Delivery::StoreError => self.store_errors += 1,
            Delivery::LeaseExpired => self.lease_expired += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Delivery {
    Delivered,
    Retried,
    DeadLettered,
    StoreError,
    LeaseExpired,
}

/// Claims due outbox records and publishes them
pub struct RelayWorker {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
}

impl RelayWorker {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run one poll cycle: claim a batch, publish it, record each outcome
    ///
    /// Only a failed claim is an error; per-record update failures are logged
    /// and counted in the report.
    ///
    /// A record is only published while a whole publish attempt still fits in
    /// its claim lease. The rest of the batch is left for a later claim, so a
    /// slow batch never overlaps with another relay's claim of the same rows.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let claimed_at = Instant::now();
        let lease = self.repository.claim_lease();
        let batch = self
            .repository
            .fetch_pending_events(self.config.batch_size)
            .await?;

        let mut report = TickReport {
            claimed: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        debug!(claimed = batch.len(), "claimed outbox batch");

        let deliveries: Vec<Delivery> = stream::iter(batch)
            .map(|record| async move { self.deliver(&record, claimed_at, lease).await })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for delivery in deliveries {
            report.record(delivery);
        }
        Ok(report)
    }

    /// Poll until `shutdown` turns true or its sender is dropped
    ///
    /// Shutdown is observed between batches, so a batch that has started
    /// always finishes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = millis(self.config.poll_interval),
            batch_size = self.config.batch_size,
            max_concurrency = self.config.max_concurrency,
            "relay worker started"
        );

        let mut last_purge: Option<Instant> = None;

        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            let full_batch = match self.tick().await {
                Ok(report) => {
                    if report.claimed > 0 {
                        info!(
                            claimed = report.claimed,
                            delivered = report.delivered,
                            retried = report.retried,
                            dead_lettered = report.dead_lettered,
                            lease_expired = report.lease_expired,
                            "relay tick"
                        );
                    }
                    report.claimed >= self.config.batch_size
                }
                Err(e) => {
                    error!(error = %e, "failed to fetch pending outbox events");
                    false
                }
            };

            if self.config.retention.is_some()
                && last_purge.map_or(true, |at| at.elapsed() >= self.config.purge_interval)
            {
                last_purge = Some(Instant::now());
                if let Err(e) = self.purge().await {
                    error!(error = %e, "failed to purge processed outbox events");
                }
            }

            if full_batch {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("relay worker stopped");
    }

    /// Delete processed records older than the configured retention
    pub async fn purge(&self) -> Result<u64, StoreError> {
        let Some(retention) = self.config.retention else {
            return Ok(0);
        };

        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| Utc::now().checked_sub_signed(r));
        let Some(cutoff) = cutoff else {
            warn!(?retention, "retention out of range, skipping purge");
            return Ok(0);
        };

        let purged = self.repository.purge_processed(cutoff).await?;
        if purged > 0 {
            info!(purged, "purged processed outbox events");
        }
        Ok(purged)
    }

    async fn deliver(
        &self,
        record: &OutboxRecord,
        claimed_at: Instant,
        lease: Duration,
    ) -> Delivery {
        if claimed_at.elapsed().saturating_add(self.config.publish_timeout) > lease {
            debug!(
                outbox_id = %record.id,
                elapsed_ms = millis(claimed_at.elapsed()),
                "claim lease too short for another publish, leaving record for a later claim"
            );
            return Delivery::LeaseExpired;
        }

        let published = tokio::time::timeout(
            self.config.publish_timeout,
            self.publisher.publish_event(record),
        )
        .await
        .unwrap_or(Err(PublishError::Timeout(self.config.publish_timeout)));

        match published {
            Ok(()) => self.complete(record).await,
            Err(e) => self.fail(record, e).await,
        }
    }

    async fn complete(&self, record: &OutboxRecord) -> Delivery {
        let result = match self.config.completion {
            CompletionPolicy::Retain => {
                self.repository
                    .update_event(
                        record.id,
                        OutboxStatus::Processed,
                        record.retry_count,
                        record.last_error.as_deref(),
                    )
                    .await
            }
            CompletionPolicy::Delete => self.repository.delete_event(record.id).await,
        };

        match result {
            Ok(()) => {
                debug!(
                    outbox_id = %record.id,
                    topic = %record.topic,
                    event_type = %record.event_type,
                    "outbox event delivered"
                );
                Delivery::Delivered
            }
            Err(e) => {
                error!(outbox_id = %record.id, error = %e, "failed to mark outbox event delivered");
                Delivery::StoreError
            }
        }
    }

    async fn fail(&self, record: &OutboxRecord, publish_error: PublishError) -> Delivery {
        let retry_count = record.retry_count.saturating_add(1);
        let message = publish_error.to_string();

        let (status, delivery) = if retry_count > record.max_retries {
            error!(
                outbox_id = %record.id,
                topic = %record.topic,
                event_type = %record.event_type,
                retry_count,
                error = %message,
                "outbox event exhausted retries, moving to dead letter"
            );
            (OutboxStatus::Failed, Delivery::DeadLettered)
        } else {
            warn!(
                outbox_id = %record.id,
                topic = %record.topic,
                event_type = %record.event_type,
                retry_count,
                error = %message,
                "outbox publish failed, scheduling retry"
            );
            (OutboxStatus::Pending, Delivery::Retried)
        };

        match self
            .repository
            .update_event(record.id, status, retry_count, Some(&message))
            .await
        {
            Ok(()) => delivery,
            Err(e) => {
                error!(outbox_id = %record.id, error = %e, "failed to record publish failure");
                Delivery::StoreError
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::model::{EnqueueOutcome, NewOutboxEvent};
    use crate::publisher::InMemoryPublisher;
    use crate::repository::InMemoryOutboxRepository;

    fn repository() -> Arc<InMemoryOutboxRepository> {
        Arc::new(
            InMemoryOutboxRepository::new().with_backoff(BackoffPolicy::fixed(Duration::from_millis(1))),
        )
    }

    async fn enqueue(repository: &InMemoryOutboxRepository, event_type: &str) -> Uuid {
        let event = NewOutboxEvent::new("Todo", Uuid::now_v7(), "todos", event_type, &json!({}))
            .unwrap();
        match repository.create_event(&event).await.unwrap() {
            EnqueueOutcome::Inserted(id) => id,
            EnqueueOutcome::Duplicate => unreachable!(),
        }
    }

    async fn tick_after_backoff(worker: &RelayWorker) -> TickReport {
        tokio::time::sleep(Duration::from_millis(5)).await;
        worker.tick().await.unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_success_after_two_failures() {
        let repository = repository();
        let publisher = Arc::new(InMemoryPublisher::new());
        publisher.fail_times(2, PublishError::Unavailable("broker down".into()));
        let id = enqueue(&repository, "TODO_CREATED").await;

        let worker = RelayWorker::new(repository.clone(), publisher.clone(), RelayConfig::default());

        assert_eq!(tick_after_backoff(&worker).await.retried, 1);
        assert_eq!(tick_after_backoff(&worker).await.retried, 1);
        assert_eq!(tick_after_backoff(&worker).await.delivered, 1);

        let record = repository.get_event(id).await.unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Processed);
        assert_eq!(record.retry_count, 2);
        assert!(record.processed_at.is_some());
        assert_eq!(publisher.delivered().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_dead_letter_after_max_retries() {
        let repository = repository();
        let publisher = Arc::new(InMemoryPublisher::new());
        publisher.mark_topic_missing("todos");
        let id = enqueue(&repository, "TODO_DELETED").await;

        let worker = RelayWorker::new(repository.clone(), publisher.clone(), RelayConfig::default());

        for attempt in 1..=5 {
            let report = tick_after_backoff(&worker).await;
            assert_eq!(report.retried, 1, "attempt {attempt}");
        }
        assert_eq!(tick_after_backoff(&worker).await.dead_lettered, 1);

        let record = repository.get_event(id).await.unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Failed);
        assert_eq!(record.retry_count, 6);
        assert!(record.processed_at.is_none());
        assert_eq!(record.last_error.as_deref(), Some("topic not found: todos"));

        assert_eq!(tick_after_backoff(&worker).await.claimed, 0);
        assert_eq!(publisher.call_count(), 6);
    }

    #[tokio::test]
    async fn test_delete_policy_removes_delivered_records() {
        let repository = repository();
        let publisher = Arc::new(InMemoryPublisher::new());
        enqueue(&repository, "A").await;
        enqueue(&repository, "B").await;

        let config = RelayConfig::default().with_completion(CompletionPolicy::Delete);
        let worker = RelayWorker::new(repository.clone(), publisher.clone(), config);

        let report = worker.tick().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn test_publish_timeout_is_retried() {
        let repository = repository();
        let publisher =
            Arc::new(InMemoryPublisher::new().with_latency(Duration::from_millis(200)));
        let id = enqueue(&repository, "SLOW").await;

        let config = RelayConfig::default().with_publish_timeout(Duration::from_millis(20));
        let worker = RelayWorker::new(repository.clone(), publisher, config);

        let report = worker.tick().await.unwrap();
        assert_eq!(report.retried, 1);

        let record = repository.get_event(id).await.unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert!(record.last_error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let worker = RelayWorker::new(
            repository(),
            Arc::new(InMemoryPublisher::new()),
            RelayConfig::default(),
        );
        assert_eq!(worker.tick().await.unwrap(), TickReport::default());
    }

    #[tokio::test]
    async fn test_batch_size_limits_claim() {
        let repository = repository();
        for _ in 0..3 {
            enqueue(&repository, "A").await;
        }

        let config = RelayConfig::default().with_batch_size(2);
        let worker = RelayWorker::new(repository, Arc::new(InMemoryPublisher::new()), config);

        assert_eq!(worker.tick().await.unwrap().delivered, 2);
        assert_eq!(worker.tick().await.unwrap().delivered, 1);
    }

    #[tokio::test]
    async fn test_concurrent_publishing_within_batch() {
        let repository = repository();
        for _ in 0..4 {
            enqueue(&repository, "A").await;
        }
        let publisher = Arc::new(InMemoryPublisher::new().with_latency(Duration::from_millis(100)));

        let config = RelayConfig::default().with_max_concurrency(4);
        let worker = RelayWorker::new(repository, publisher, config);

        let started = Instant::now();
        assert_eq!(worker.tick().await.unwrap().delivered, 4);
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[test_log::test(tokio::test)]
    async fn test_slow_batch_does_not_outlive_claim_lease() {
        let repository = Arc::new(
            InMemoryOutboxRepository::new()
                .with_backoff(BackoffPolicy::fixed(Duration::from_millis(1)))
                .with_claim_lease(Duration::from_millis(100)),
        );
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(enqueue(&repository, "A").await);
        }
        let publisher = Arc::new(InMemoryPublisher::new().with_latency(Duration::from_millis(60)));

        let config = RelayConfig::default()
            .with_batch_size(3)
            .with_publish_timeout(Duration::from_millis(80));
        let workers = [
            RelayWorker::new(repository.clone(), publisher.clone(), config.clone()),
            RelayWorker::new(repository.clone(), publisher.clone(), config),
        ];

        let first = workers[0].tick().await.unwrap();
        assert_eq!(first.claimed, 3);
        assert_eq!(first.delivered, 1);
        assert_eq!(first.lease_expired, 2);

        let mut store_errors = first.store_errors;
        for round in 0..10 {
            if repository
                .snapshot()
                .iter()
                .all(|r| r.status == OutboxStatus::Processed)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(110)).await;
            store_errors += workers[(round + 1) % 2].tick().await.unwrap().store_errors;
        }

        for id in ids {
            let record = repository.get_event(id).await.unwrap().unwrap();
            assert_eq!(record.status, OutboxStatus::Processed);
        }
        assert_eq!(store_errors, 0);
        assert_eq!(publisher.call_count(), 3);
        assert_eq!(publisher.delivered().len(), 3);
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let repository = repository();
        let publisher = Arc::new(InMemoryPublisher::new());
        enqueue(&repository, "A").await;

        let config = RelayConfig::default().with_retention(Duration::ZERO);
        let worker = RelayWorker::new(repository.clone(), publisher, config);
        worker.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(worker.purge().await.unwrap(), 1);
        assert!(repository.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_run_delivers_until_shutdown() {
        let repository = repository();
        let publisher = Arc::new(InMemoryPublisher::new());
        enqueue(&repository, "A").await;

        let config = RelayConfig::default().with_poll_interval(Duration::from_millis(10));
        let worker = Arc::new(RelayWorker::new(repository.clone(), publisher.clone(), config));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(shutdown_rx).await }
        });

        for _ in 0..100 {
            if !publisher.delivered().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(publisher.delivered().len(), 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker stops after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let worker = RelayWorker::new(
            repository(),
            Arc::new(InMemoryPublisher::new()),
            RelayConfig::default().with_poll_interval(Duration::from_secs(60)),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(2), worker.run(shutdown_rx))
            .await
            .expect("worker stops when the sender is gone");
    }
}
