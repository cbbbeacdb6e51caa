//! In-memory Unit of Work for testing

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::{TransactionScope, UnitOfWork};
use crate::error::StoreError;
use crate::model::{EnqueueOutcome, NewOutboxEvent};
use crate::repository::{InMemoryOutboxRepository, OutboxWriter};
use crate::todos::{InMemoryTodoStore, StagedTodos, TodoRepository};

/// Unit of Work over the in-memory stores
///
/// Writes are staged and applied on commit under the outbox lock; an error
/// discards them. An enqueue reported as inserted is confirmed at commit: if a
/// concurrent transaction committed the same dedupe key first, the whole unit
/// fails with [`StoreError::Conflict`] and nothing is applied.
pub struct InMemoryUnitOfWork {
    outbox: Arc<InMemoryOutboxRepository>,
    todos: Arc<InMemoryTodoStore>,
    rollback_failure: Mutex<Option<String>>,
}

impl InMemoryUnitOfWork {
    pub fn new(outbox: Arc<InMemoryOutboxRepository>, todos: Arc<InMemoryTodoStore>) -> Self {
        Self {
            outbox,
            todos,
            rollback_failure: Mutex::new(None),
        }
    }

    pub fn outbox(&self) -> &Arc<InMemoryOutboxRepository> {
        &self.outbox
    }

    pub fn todos(&self) -> &Arc<InMemoryTodoStore> {
        &self.todos
    }

    /// Make the next rollback fail with `message`
    pub fn fail_next_rollback(&self, message: impl Into<String>) {
        *self.rollback_failure.lock() = Some(message.into());
    }
}

struct StagedOutbox<'a> {
    repository: &'a InMemoryOutboxRepository,
    events: Vec<NewOutboxEvent>,
}

#[async_trait]
impl OutboxWriter for StagedOutbox<'_> {
    async fn create_event(
        &mut self,
        event: &NewOutboxEvent,
    ) -> Result<EnqueueOutcome, StoreError> {
        if let Some(key) = event.dedupe_key.as_deref() {
            let staged = self
                .events
                .iter()
                .any(|e| e.dedupe_key.as_deref() == Some(key));
            if staged || self.repository.has_dedupe_key(key) {
                return Ok(EnqueueOutcome::Duplicate);
            }
        }

        self.events.push(event.clone());
        Ok(EnqueueOutcome::Inserted(event.id))
    }
}

struct InMemoryTransactionScope<'a> {
    outbox: StagedOutbox<'a>,
    todos: StagedTodos<'a>,
}

impl TransactionScope for InMemoryTransactionScope<'_> {
    fn outbox(&mut self) -> &mut dyn OutboxWriter {
        &mut self.outbox
    }

    fn todos(&mut self) -> &mut dyn TodoRepository {
        &mut self.todos
    }
}

impl UnitOfWork for InMemoryUnitOfWork {
    async fn execute<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut dyn TransactionScope) -> BoxFuture<'s, Result<T, StoreError>>
            + Send,
    {
        let mut scope = InMemoryTransactionScope {
            outbox: StagedOutbox {
                repository: &self.outbox,
                events: Vec::new(),
            },
            todos: StagedTodos::new(&self.todos),
        };

        let outcome = work(&mut scope).await;

        match outcome {
            Ok(value) => {
                let InMemoryTransactionScope { outbox, todos } = scope;
                self.outbox.commit_staged(&outbox.events, || todos.commit())?;
                Ok(value)
            }
            Err(original) => {
                let rollback_failure = self.rollback_failure.lock().take();
                match rollback_failure {
                    Some(rollback) => Err(StoreError::RollbackFailed {
                        original: Box::new(original),
                        rollback,
                    }),
                    None => Err(original),
                }
            }
        }
    }
}
