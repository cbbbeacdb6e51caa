//! # Courier Outbox
//!
//! A PostgreSQL-backed transactional outbox with a reliable relay.
//!
//! ## Features
//!
//! - **Atomic enqueue**: a domain write and its event commit in one transaction
//! - **Idempotent enqueue**: events with the same dedupe key are stored once
//! - **Competing consumers**: relays claim disjoint batches with `SKIP LOCKED`
//! - **Bounded retries**: exponential backoff with jitter, then dead-lettering
//! - **At-least-once delivery**: a crash after publish redelivers the event
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Domain operation (TodoService)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ UnitOfWork::execute
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   one transaction: TodoRepository write + OutboxWriter       │
//! │   (PostgreSQL: todos, outbox_events)                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ later, independently
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       RelayWorker                            │
//! │  (claims due records, publishes, records the outcome)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ EventPublisher
//!                              ▼
//!                        message broker
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use courier_outbox::prelude::*;
//!
//! let pool = PgPool::connect(&database_url).await?;
//! courier_outbox::MIGRATOR.run(&pool).await?;
//!
//! let todos = TodoService::new(PgUnitOfWork::new(pool.clone()));
//! let todo = todos.create_todo(Todo::new("write docs")).await?;
//! todos.delete_todo(todo.id).await?;
//!
//! let worker = RelayWorker::new(
//!     Arc::new(PgOutboxRepository::new(pool)),
//!     Arc::new(publisher),
//!     RelayConfig::default(),
//! );
//! worker.run(shutdown_rx).await;
//! ```

pub mod backoff;
pub mod dedupe;
pub mod error;
pub mod model;
pub mod publisher;
pub mod relay;
pub mod repository;
pub mod todos;
pub mod uow;

/// Schema migrations for `outbox_events` and the sample `todos` table
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Prelude for common imports
pub mod prelude {
    pub use crate::backoff::BackoffPolicy;
    pub use crate::dedupe::DedupeKey;
    pub use crate::error::{PublishError, StoreError};
    pub use crate::model::{EnqueueOutcome, NewOutboxEvent, OutboxRecord, OutboxStatus};
    pub use crate::publisher::{EventPublisher, InMemoryPublisher, OutboundMessage};
    pub use crate::relay::{CompletionPolicy, RelayConfig, RelayWorker, TickReport};
    pub use crate::repository::{
        InMemoryOutboxRepository, OutboxRepository, OutboxWriter, PgOutboxRepository,
    };
    pub use crate::todos::{Todo, TodoRepository, TodoService};
    pub use crate::uow::{InMemoryUnitOfWork, PgUnitOfWork, TransactionScope, UnitOfWork};
}

// Re-export key types at crate root
pub use backoff::BackoffPolicy;
pub use dedupe::DedupeKey;
pub use error::{PublishError, StoreError};
pub use model::{
    EnqueueOutcome, NewOutboxEvent, OutboxRecord, OutboxStatus, StatusCounts,
    DEFAULT_MAX_RETRIES,
};
pub use publisher::{EventPublisher, InMemoryPublisher, OutboundMessage};
pub use relay::{CompletionPolicy, RelayConfig, RelayWorker, TickReport};
pub use repository::{InMemoryOutboxRepository, OutboxRepository, OutboxWriter, PgOutboxRepository};
pub use uow::{InMemoryUnitOfWork, PgUnitOfWork, TransactionScope, UnitOfWork};
