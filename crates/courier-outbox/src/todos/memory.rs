//! In-memory todo persistence for testing

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{not_found, Todo, TodoRepository};
use crate::error::StoreError;

/// Committed todos
#[derive(Default)]
pub struct InMemoryTodoStore {
    todos: RwLock<HashMap<Uuid, Todo>>,
}

impl InMemoryTodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<Todo> {
        self.todos.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.todos.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.todos.read().is_empty()
    }

    fn apply(&self, changes: Vec<TodoChange>) {
        let mut todos = self.todos.write();
        for change in changes {
            match change {
                TodoChange::Insert(todo) => {
                    todos.entry(todo.id).or_insert(todo);
                }
                TodoChange::Delete(id) => {
                    todos.remove(&id);
                }
            }
        }
    }
}

enum TodoChange {
    Insert(Todo),
    Delete(Uuid),
}

/// Uncommitted todo writes of one in-memory transaction
///
/// Reads see the transaction's own writes on top of the committed store.
pub struct StagedTodos<'a> {
    store: &'a InMemoryTodoStore,
    changes: Vec<TodoChange>,
}

impl<'a> StagedTodos<'a> {
    pub(crate) fn new(store: &'a InMemoryTodoStore) -> Self {
        Self {
            store,
            changes: Vec::new(),
        }
    }

    pub(crate) fn commit(self) {
        self.store.apply(self.changes);
    }

    fn current(&self, id: Uuid) -> Option<Todo> {
        for change in self.changes.iter().rev() {
            match change {
                TodoChange::Insert(todo) if todo.id == id => return Some(todo.clone()),
                TodoChange::Delete(deleted) if *deleted == id => return None,
                _ => {}
            }
        }
        self.store.get(id)
    }
}

#[async_trait]
impl TodoRepository for StagedTodos<'_> {
    async fn insert(&mut self, todo: &Todo) -> Result<bool, StoreError> {
        if self.current(todo.id).is_some() {
            return Ok(false);
        }
        self.changes.push(TodoChange::Insert(todo.clone()));
        Ok(true)
    }

    async fn delete(&mut self, id: Uuid) -> Result<Todo, StoreError> {
        let todo = self.current(id).ok_or_else(|| not_found(id))?;
        self.changes.push(TodoChange::Delete(id));
        Ok(todo)
    }

    async fn get(&mut self, id: Uuid) -> Result<Option<Todo>, StoreError> {
        Ok(self.current(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_staged_writes_are_invisible_until_commit() {
        let store = InMemoryTodoStore::new();
        let todo = Todo::new("write tests");

        let mut staged = StagedTodos::new(&store);
        assert!(staged.insert(&todo).await.unwrap());
        assert_eq!(staged.get(todo.id).await.unwrap(), Some(todo.clone()));
        assert!(store.get(todo.id).is_none());

        staged.commit();
        assert_eq!(store.get(todo.id), Some(todo));
    }

    #[tokio::test]
    async fn test_delete_sees_own_insert() {
        let store = InMemoryTodoStore::new();
        let todo = Todo::new("short lived");

        let mut staged = StagedTodos::new(&store);
        staged.insert(&todo).await.unwrap();
        let deleted = staged.delete(todo.id).await.unwrap();
        assert_eq!(deleted.id, todo.id);

        let err = staged.delete(todo.id).await.unwrap_err();
        assert!(err.to_string().contains("todo not found"));

        staged.commit();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_reported() {
        let store = InMemoryTodoStore::new();
        let todo = Todo::new("once");

        let mut staged = StagedTodos::new(&store);
        assert!(staged.insert(&todo).await.unwrap());
        assert!(!staged.insert(&todo).await.unwrap());
    }
}
