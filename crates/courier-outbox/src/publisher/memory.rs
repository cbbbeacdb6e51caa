//! In-memory publisher for testing

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EventPublisher, OutboundMessage};
use crate::error::PublishError;
use crate::model::OutboxRecord;

/// Publisher that records messages instead of sending them
///
/// Failures can be scripted per call ([`fail_next`](Self::fail_next)) or per
/// topic ([`mark_topic_missing`](Self::mark_topic_missing)).
#[derive(Default)]
pub struct InMemoryPublisher {
    delivered: Mutex<Vec<OutboundMessage>>,
    scripted_failures: Mutex<VecDeque<PublishError>>,
    missing_topics: Mutex<HashSet<String>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every publish call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next publish call with `error`; calls queue up in order
    pub fn fail_next(&self, error: PublishError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Fail the next `times` publish calls with `error`
    pub fn fail_times(&self, times: usize, error: PublishError) {
        let mut failures = self.scripted_failures.lock();
        for _ in 0..times {
            failures.push_back(error.clone());
        }
    }

    /// Fail every publish to `topic` with [`PublishError::TopicNotFound`]
    pub fn mark_topic_missing(&self, topic: impl Into<String>) {
        self.missing_topics.lock().insert(topic.into());
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.delivered.lock().clone()
    }

    /// Number of publish attempts, successful or not
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish_event(&self, record: &OutboxRecord) -> Result<(), PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.missing_topics.lock().contains(&record.topic) {
            return Err(PublishError::TopicNotFound(record.topic.clone()));
        }

        let scripted = self.scripted_failures.lock().pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        let message = OutboundMessage::from_record(record)?;
        self.delivered.lock().push(message);
        Ok(())
    }
}
