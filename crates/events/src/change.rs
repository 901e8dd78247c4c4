//! Output of a pure mutation function.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use supplyline_core::{DomainError, DomainResult, HistoryEntry};

use crate::event::Event;

/// A decided state transition: the next state, what to record in history,
/// and the integration event announcing it.
///
/// Mutation functions build this from the current state without touching any
/// store; the repository commits it (or nothing) in one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange<A> {
    pub next: A,
    pub history: HistoryEntry,
    pub event_type: String,
    pub data: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl<A> StateChange<A> {
    /// Build a change from a typed domain event (serialized into `data`).
    pub fn new<E>(next: A, history: HistoryEntry, event: &E) -> DomainResult<Self>
    where
        E: Event + Serialize,
    {
        let data = serde_json::to_value(event)
            .map_err(|e| DomainError::invariant(format!("event serialization failed: {e}")))?;

        Ok(Self {
            next,
            history,
            event_type: event.event_type().to_string(),
            data,
            occurred_at: event.occurred_at(),
        })
    }
}
