//! Unit of Work
//!
//! Runs a closure against one database transaction and hands it
//! transaction-scoped repositories, so a domain write and its outbox insert
//! commit or roll back together.
//!
//! ```ignore
//! let todo = uow
//!     .execute(|scope| {
//!         Box::pin(async move {
//!             scope.todos().insert(&todo).await?;
//!             scope.outbox().create_event(&event).await?;
//!             Ok::<_, StoreError>(todo)
//!         })
//!     })
//!     .await?;
//! ```

use std::future::Future;

use futures::future::BoxFuture;

use crate::error::StoreError;
use crate::repository::OutboxWriter;
use crate::todos::TodoRepository;

mod memory;
mod postgres;

pub use memory::InMemoryUnitOfWork;
pub use postgres::{PgTransactionScope, PgUnitOfWork};

/// Repositories bound to one open transaction
pub trait TransactionScope: Send {
    fn outbox(&mut self) -> &mut dyn OutboxWriter;

    fn todos(&mut self) -> &mut dyn TodoRepository;
}

/// Transactional boundary for domain operations
///
/// `execute` begins a transaction, runs `work`, and commits if it returns
/// `Ok`. On `Err` it rolls back and returns that error; if the rollback also
/// fails, both are returned as [`StoreError::RollbackFailed`]. A commit
/// failure is returned as-is.
pub trait UnitOfWork: Send + Sync {
    fn execute<T, F>(&self, work: F) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut dyn TransactionScope) -> BoxFuture<'s, Result<T, StoreError>>
            + Send;
}
