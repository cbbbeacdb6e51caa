//! Relay worker
//!
//! Moves outbox records to the broker:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      RelayWorker                          │
//! │                                                           │
//! │   fetch_pending_events(batch_size)   (SKIP LOCKED claim)  │
//! │            │                                              │
//! │            ▼                                              │
//! │   publish_event  x max_concurrency   (publish_timeout)    │
//! │            │                                              │
//! │     ┌──────┼────────────────┬─────────────────────┐       │
//! │     ▼      ▼                ▼                     ▼       │
//! │  Processed  Deleted    Pending (+backoff)      Failed     │
//! │  (retain)  (delete)    retry <= max_retries    (dead      │
//! │                                                letter)    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use courier_outbox::relay::{RelayConfig, RelayWorker};
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let worker = RelayWorker::new(repository, publisher, RelayConfig::default());
//! let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
//!
//! // Graceful shutdown: the current batch finishes first
//! shutdown_tx.send(true)?;
//! handle.await?;
//! ```

mod config;
mod worker;

pub use config::{CompletionPolicy, RelayConfig};
pub use worker::{RelayWorker, TickReport};
