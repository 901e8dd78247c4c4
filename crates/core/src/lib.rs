//! `supplyline-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, the aggregate/versioning contract, and
//! the audit/alert records every tracked aggregate produces.

pub mod aggregate;
pub mod alert;
pub mod error;
pub mod history;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion, TrackedAggregate, Versioned};
pub use alert::{AlertDraft, AlertRecord, AlertStatus};
pub use error::{DomainError, DomainResult};
pub use history::{HistoryEntry, HistoryRecord};
pub use id::{AggregateId, AlertId, EventId, HistoryId};
