//! PostgreSQL Unit of Work

use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error};

use super::{TransactionScope, UnitOfWork};
use crate::error::StoreError;
use crate::repository::OutboxWriter;
use crate::todos::TodoRepository;

/// Unit of Work over a PostgreSQL pool
#[derive(Clone)]
pub struct PgUnitOfWork {
    pool: PgPool,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Repositories sharing one open transaction
pub struct PgTransactionScope {
    tx: Transaction<'static, Postgres>,
}

impl TransactionScope for PgTransactionScope {
    fn outbox(&mut self) -> &mut dyn OutboxWriter {
        &mut *self.tx
    }

    fn todos(&mut self) -> &mut dyn TodoRepository {
        &mut *self.tx
    }
}

impl UnitOfWork for PgUnitOfWork {
    async fn execute<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut dyn TransactionScope) -> BoxFuture<'s, Result<T, StoreError>>
            + Send,
    {
        let tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let mut scope = PgTransactionScope { tx };
        let outcome = work(&mut scope).await;

        match outcome {
            Ok(value) => {
                scope.tx.commit().await.map_err(|e| {
                    error!("Failed to commit transaction: {}", e);
                    StoreError::Database(e.to_string())
                })?;
                Ok(value)
            }
            Err(original) => {
                if let Err(rollback) = scope.tx.rollback().await {
                    error!(error = %original, rollback_error = %rollback, "rollback failed");
                    return Err(StoreError::RollbackFailed {
                        original: Box::new(original),
                        rollback: rollback.to_string(),
                    });
                }
                debug!(error = %original, "unit of work rolled back");
                Err(original)
            }
        }
    }
}
