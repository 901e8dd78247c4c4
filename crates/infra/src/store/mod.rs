//! Entity + outbox persistence boundary.
//!
//! The repository writes aggregates, history, alerts, and outbox entries in
//! one [`UnitOfWork`]; the relay only touches outbox delivery status.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryStore, StoreSnapshot};
pub use postgres::PostgresStore;
pub use r#trait::{AggregateRow, EntityStore, OutboxStats, OutboxStore, StoreError, UnitOfWork};
