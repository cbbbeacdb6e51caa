//! Sample domain: todo items
//!
//! A minimal domain that exercises the Unit of Work. Each mutation writes the
//! todo and enqueues its event in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

mod memory;
mod postgres;
mod service;

pub use memory::{InMemoryTodoStore, StagedTodos};
pub use service::{TodoService, ENTITY_TYPE, TODO_CREATED, TODO_DELETED, TOPIC};

/// A todo item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: Uuid,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    /// `created_at` is truncated to microseconds, the precision PostgreSQL stores
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            completed: false,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

/// Todo persistence bound to a transaction
#[async_trait]
pub trait TodoRepository: Send {
    /// Insert a todo; `false` if one with the same id already exists
    async fn insert(&mut self, todo: &Todo) -> Result<bool, StoreError>;

    /// Delete a todo and return it; a missing todo is a [`StoreError::Domain`]
    async fn delete(&mut self, id: Uuid) -> Result<Todo, StoreError>;

    async fn get(&mut self, id: Uuid) -> Result<Option<Todo>, StoreError>;
}

pub(crate) fn not_found(id: Uuid) -> StoreError {
    StoreError::domain(format!("todo not found: {id}"))
}
