//! PostgreSQL todo persistence
//!
//! Implemented on the connection itself so a transaction can hand the same
//! connection to both the todo and outbox repositories.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{not_found, Todo, TodoRepository};
use crate::error::StoreError;

#[async_trait]
impl TodoRepository for PgConnection {
    #[instrument(skip(self, todo), fields(todo_id = %todo.id))]
    async fn insert(&mut self, todo: &Todo) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO todos (id, title, completed, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(todo.id)
        .bind(&todo.title)
        .bind(todo.completed)
        .bind(todo.created_at)
        .execute(&mut *self)
        .await
        .map_err(|e| {
            error!("Failed to insert todo: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(inserted = result.rows_affected() == 1, "insert todo");
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn delete(&mut self, id: Uuid) -> Result<Todo, StoreError> {
        let row = sqlx::query(
            r#"
            DELETE FROM todos
            WHERE id = $1
            RETURNING id, title, completed, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self)
        .await
        .map_err(|e| {
            error!("Failed to delete todo: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or_else(|| not_found(id))?;

        todo_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get(&mut self, id: Uuid) -> Result<Option<Todo>, StoreError> {
        let row = sqlx::query("SELECT id, title, completed, created_at FROM todos WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self)
            .await
            .map_err(|e| {
                error!("Failed to get todo: {}", e);
                StoreError::Database(e.to_string())
            })?;

        row.as_ref().map(todo_from_row).transpose()
    }
}

fn todo_from_row(row: &PgRow) -> Result<Todo, StoreError> {
    Ok(Todo {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        completed: row.try_get("completed")?,
        created_at: row.try_get("created_at")?,
    })
}
