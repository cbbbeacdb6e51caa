//! Event publishing
//!
//! The relay hands each claimed record to an [`EventPublisher`]. Broker
//! adapters convert the record into an [`OutboundMessage`]: raw payload bytes
//! plus string attributes consumers can filter on.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::PublishError;
use crate::model::OutboxRecord;

mod memory;

pub use memory::InMemoryPublisher;

/// Delivers outbox records to a message broker
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    /// Publish the record's payload to its topic
    ///
    /// Every error is treated as retryable by the relay.
    async fn publish_event(&self, record: &OutboxRecord) -> Result<(), PublishError>;
}

/// Transport-level message built from an outbox record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

impl OutboundMessage {
    pub fn from_record(record: &OutboxRecord) -> Result<Self, PublishError> {
        let data = record
            .payload_bytes()
            .map_err(|e| PublishError::Encoding(e.to_string()))?;

        let mut attributes = BTreeMap::new();
        attributes.insert("event_type".to_string(), record.event_type.clone());
        attributes.insert("entity_id".to_string(), record.entity_id.to_string());
        attributes.insert("entity_type".to_string(), record.entity_type.clone());
        attributes.insert("outbox_id".to_string(), record.id.to_string());

        Ok(Self {
            topic: record.topic.clone(),
            data,
            attributes,
        })
    }
}
