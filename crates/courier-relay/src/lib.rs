//! Relay process for the courier outbox
//!
//! Wires environment configuration, tracing, and the Google Cloud Pub/Sub
//! publisher around [`courier_outbox::RelayWorker`].

pub mod config;
pub mod pubsub;
pub mod telemetry;

pub use config::RelaySettings;
pub use pubsub::{PubSubConfig, PubSubPublisher};
pub use telemetry::{init_tracing, LogFormat};
