//! Outbox persistence
//!
//! This module provides:
//! - [`OutboxRepository`] trait for enqueue, claim, and outcome tracking
//! - [`OutboxWriter`] trait for enqueue inside a unit of work
//! - [`PgOutboxRepository`] for production
//! - [`InMemoryOutboxRepository`] for testing

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryOutboxRepository;
pub use postgres::{PgOutboxRepository, DEFAULT_CLAIM_LEASE};
pub use store::{OutboxRepository, OutboxWriter};
