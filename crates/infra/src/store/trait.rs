use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use supplyline_core::{AggregateId, AlertId, AlertRecord, AlertStatus, EventId, HistoryRecord};
use supplyline_events::OutboxEntry;

/// Live row of an aggregate (one per entity).
///
/// The state is stored as JSON; the repository (de)serializes it into the
/// typed aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub id: AggregateId,
    pub aggregate_type: String,
    pub version: u64,
    pub state: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything one committed transition writes.
///
/// Stores must persist all parts of a unit atomically, or none of them.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOfWork {
    /// The new row; `row.version` is `expected_version + 1` (or 1 on create).
    pub row: AggregateRow,
    /// Version the row must currently have. `None` means the row must not exist yet.
    pub expected_version: Option<u64>,
    pub history: HistoryRecord,
    pub alert: Option<AlertRecord>,
    pub outbox: OutboxEntry,
}

/// Outbox counters for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub failed: u64,
    pub published: u64,
    pub dead_lettered: u64,
    /// Creation time of the oldest entry still owed to the broker.
    pub oldest_undelivered_at: Option<DateTime<Utc>>,
}

impl OutboxStats {
    /// Entries still owed to the broker (`pending` + `failed`).
    pub fn backlog(&self) -> u64 {
        self.pending + self.failed
    }
}

/// Store operation error.
///
/// Infrastructure-level failures. Domain validation never reaches a store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Compare-and-swap on the aggregate version lost.
    #[error("version conflict on {aggregate_id}: expected {expected}, found {actual}")]
    Conflict {
        aggregate_id: AggregateId,
        expected: u64,
        actual: u64,
    },

    #[error("aggregate already exists: {0}")]
    Duplicate(AggregateId),

    #[error("not found: {0}")]
    NotFound(String),

    /// The unit of work could not be committed (connection, IO, lock poisoning).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A status change that the record's lifecycle does not allow.
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),
}

/// Durable storage for aggregates, their history, and their alerts.
///
/// `commit` is the only write path for aggregate state and owns the atomic
/// unit: row CAS, history append, optional alert, outbox append.
pub trait EntityStore: Send + Sync {
    fn load(&self, id: AggregateId) -> Result<Option<AggregateRow>, StoreError>;

    /// Unresolved alerts of an aggregate.
    fn open_alerts(&self, id: AggregateId) -> Result<Vec<AlertRecord>, StoreError>;

    /// Persist a unit of work atomically.
    ///
    /// Fails with `Conflict` when the stored version differs from
    /// `unit.expected_version`, and with `Duplicate` when creating a row that
    /// already exists. Nothing is written on failure.
    fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError>;

    /// History of an aggregate ordered by version.
    fn history(&self, id: AggregateId) -> Result<Vec<HistoryRecord>, StoreError>;

    fn alerts_for(&self, id: AggregateId) -> Result<Vec<AlertRecord>, StoreError>;

    fn alerts_by_status(&self, status: AlertStatus) -> Result<Vec<AlertRecord>, StoreError>;

    /// Move an alert forward in its lifecycle.
    fn update_alert_status(
        &self,
        id: AlertId,
        to: AlertStatus,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError>;
}

/// Relay-side access to the outbox.
///
/// The relay only ever changes delivery status; entries are created by
/// [`EntityStore::commit`].
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` entries the relay may attempt at `now`, oldest first.
    ///
    /// An aggregate whose oldest undelivered entry is still backing off
    /// contributes nothing, so its later entries never overtake it.
    /// Dead-lettered entries do not hold back their aggregate.
    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    fn get(&self, id: EventId) -> Result<Option<OutboxEntry>, StoreError>;

    /// Record a broker acknowledgment. Already-published entries are left as is.
    fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Record a failed attempt; `retry_at = None` dead-letters the entry.
    fn mark_failed(
        &self,
        id: EventId,
        error: &str,
        at: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    fn stats(&self) -> Result<OutboxStats, StoreError>;

    fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Manual intervention: reset a dead-lettered entry to `pending`.
    fn requeue(&self, id: EventId) -> Result<OutboxEntry, StoreError>;
}

impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    fn load(&self, id: AggregateId) -> Result<Option<AggregateRow>, StoreError> {
        (**self).load(id)
    }

    fn open_alerts(&self, id: AggregateId) -> Result<Vec<AlertRecord>, StoreError> {
        (**self).open_alerts(id)
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        (**self).commit(unit)
    }

    fn history(&self, id: AggregateId) -> Result<Vec<HistoryRecord>, StoreError> {
        (**self).history(id)
    }

    fn alerts_for(&self, id: AggregateId) -> Result<Vec<AlertRecord>, StoreError> {
        (**self).alerts_for(id)
    }

    fn alerts_by_status(&self, status: AlertStatus) -> Result<Vec<AlertRecord>, StoreError> {
        (**self).alerts_by_status(status)
    }

    fn update_alert_status(
        &self,
        id: AlertId,
        to: AlertStatus,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        (**self).update_alert_status(id, to, at)
    }
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        (**self).fetch_due(now, limit)
    }

    fn get(&self, id: EventId) -> Result<Option<OutboxEntry>, StoreError> {
        (**self).get(id)
    }

    fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).mark_published(id, at)
    }

    fn mark_failed(
        &self,
        id: EventId,
        error: &str,
        at: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        (**self).mark_failed(id, error, at, retry_at)
    }

    fn stats(&self) -> Result<OutboxStats, StoreError> {
        (**self).stats()
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        (**self).dead_letters(limit)
    }

    fn requeue(&self, id: EventId) -> Result<OutboxEntry, StoreError> {
        (**self).requeue(id)
    }
}
