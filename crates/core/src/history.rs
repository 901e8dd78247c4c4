//! Append-only audit history of aggregate transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{AggregateId, HistoryId};

/// What a mutation reports about itself, before it is committed.
///
/// Either a signed `delta` (quantities) or a new `value` (statuses), or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Transition type, e.g. `"adjusted"`, `"status_changed"`.
    pub kind: String,
    pub delta: Option<i64>,
    pub value: Option<JsonValue>,
    pub note: Option<String>,
}

impl HistoryEntry {
    pub fn delta(kind: impl Into<String>, delta: i64) -> Self {
        Self {
            kind: kind.into(),
            delta: Some(delta),
            value: None,
            note: None,
        }
    }

    pub fn value(kind: impl Into<String>, value: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            delta: None,
            value: Some(value),
            note: None,
        }
    }

    pub fn with_value(mut self, value: JsonValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A committed, immutable history record.
///
/// Keyed by `(aggregate_id, version)`: exactly one record per committed version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: HistoryId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// The aggregate version this transition resulted in.
    pub version: u64,
    pub kind: String,
    pub delta: Option<i64>,
    pub value: Option<JsonValue>,
    pub note: Option<String>,
    /// Business time supplied with the command.
    pub occurred_at: DateTime<Utc>,
    /// Commit time.
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_entry(
        entry: HistoryEntry,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: u64,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryId::new(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            kind: entry.kind,
            delta: entry.delta,
            value: entry.value,
            note: entry.note,
            occurred_at: recorded_at,
            recorded_at,
        }
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}
