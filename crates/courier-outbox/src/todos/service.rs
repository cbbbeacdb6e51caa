//! Todo operations that publish events through the outbox

use tracing::{info, instrument};
use uuid::Uuid;

use super::Todo;
use crate::dedupe::DedupeKey;
use crate::error::StoreError;
use crate::model::NewOutboxEvent;
use crate::uow::UnitOfWork;

pub const ENTITY_TYPE: &str = "Todo";
pub const TOPIC: &str = "todos";
pub const TODO_CREATED: &str = "TODO_CREATED";
pub const TODO_DELETED: &str = "TODO_DELETED";

/// Todo commands
///
/// Every command writes the todo and its outbox event in one unit of work.
pub struct TodoService<U> {
    uow: U,
}

impl<U: UnitOfWork> TodoService<U> {
    pub fn new(uow: U) -> Self {
        Self { uow }
    }

    pub fn unit_of_work(&self) -> &U {
        &self.uow
    }

    /// Store a todo and enqueue `TODO_CREATED`
    ///
    /// Retrying with the same todo is a no-op for both the row and the event.
    #[instrument(skip(self, todo), fields(todo_id = %todo.id))]
    pub async fn create_todo(&self, todo: Todo) -> Result<Todo, StoreError> {
        let todo = self
            .uow
            .execute(move |scope| {
                Box::pin(async move {
                    scope.todos().insert(&todo).await?;
                    let event = todo_event(&todo, TODO_CREATED)?;
                    scope.outbox().create_event(&event).await?;
                    Ok::<_, StoreError>(todo)
                })
            })
            .await?;

        info!(todo_id = %todo.id, "todo created");
        Ok(todo)
    }

    /// Delete a todo and enqueue `TODO_DELETED`
    #[instrument(skip(self))]
    pub async fn delete_todo(&self, id: Uuid) -> Result<Todo, StoreError> {
        let todo = self
            .uow
            .execute(move |scope| {
                Box::pin(async move {
                    let todo = scope.todos().delete(id).await?;
                    let event = todo_event(&todo, TODO_DELETED)?;
                    scope.outbox().create_event(&event).await?;
                    Ok::<_, StoreError>(todo)
                })
            })
            .await?;

        info!(todo_id = %todo.id, "todo deleted");
        Ok(todo)
    }
}

fn todo_event(todo: &Todo, event_type: &str) -> Result<NewOutboxEvent, StoreError> {
    let key = DedupeKey::per_write(ENTITY_TYPE, event_type, todo.id, todo.created_at);
    Ok(NewOutboxEvent::new(ENTITY_TYPE, todo.id, TOPIC, event_type, todo)?.with_dedupe_key(key))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::OutboxStatus;
    use crate::repository::InMemoryOutboxRepository;
    use crate::todos::InMemoryTodoStore;
    use crate::uow::InMemoryUnitOfWork;

    fn service() -> (
        TodoService<InMemoryUnitOfWork>,
        Arc<InMemoryOutboxRepository>,
        Arc<InMemoryTodoStore>,
    ) {
        let outbox = Arc::new(InMemoryOutboxRepository::new());
        let todos = Arc::new(InMemoryTodoStore::new());
        let uow = InMemoryUnitOfWork::new(outbox.clone(), todos.clone());
        (TodoService::new(uow), outbox, todos)
    }

    #[tokio::test]
    async fn test_delete_enqueues_pending_event() {
        let (service, outbox, todos) = service();
        let todo = service.create_todo(Todo::new("ship it")).await.unwrap();

        service.delete_todo(todo.id).await.unwrap();

        assert!(todos.get(todo.id).is_none());
        let deleted: Vec<_> = outbox
            .snapshot()
            .into_iter()
            .filter(|r| r.event_type == TODO_DELETED)
            .collect();
        assert_eq!(deleted.len(), 1);

        let record = &deleted[0];
        assert_eq!(record.entity_id, todo.id);
        assert_eq!(record.entity_type, "Todo");
        assert_eq!(record.topic, "todos");
        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.max_retries, 5);
        assert_eq!(
            record.dedupe_key.as_deref(),
            Some(
                DedupeKey::per_write("Todo", TODO_DELETED, todo.id, todo.created_at).as_str()
            )
        );
    }

    #[tokio::test]
    async fn test_failed_domain_write_leaves_no_event() {
        let (service, outbox, _) = service();

        let err = service.delete_todo(Uuid::now_v7()).await.unwrap_err();

        assert!(matches!(err, StoreError::Domain(_)));
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_retried_create_enqueues_once() {
        let (service, outbox, todos) = service();
        let todo = Todo::new("idempotent");

        service.create_todo(todo.clone()).await.unwrap();
        service.create_todo(todo.clone()).await.unwrap();

        assert_eq!(todos.len(), 1);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.snapshot()[0].event_type, TODO_CREATED);
    }

    #[tokio::test]
    async fn test_event_payload_is_the_todo() {
        let (service, outbox, _) = service();
        let todo = service.create_todo(Todo::new("payload")).await.unwrap();

        let record = outbox.snapshot().remove(0);
        let payload: Todo = serde_json::from_value(record.payload).unwrap();
        assert_eq!(payload, todo);
    }
}
