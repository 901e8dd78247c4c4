//! Entity repository: the state-mutation-to-event pipeline.
//!
//! Every state change goes through one generic pipeline:
//!
//! ```text
//! (aggregate id, expected version, mutation)
//!   ↓
//! 1. Load the live row and check the expected version
//!   ↓
//! 2. Run the pure mutation (validation errors stop here, nothing written)
//!   ↓
//! 3. Evaluate alerts against the aggregate's open alerts
//!   ↓
//! 4. Commit one unit of work: row (version CAS) + history + alert + outbox entry
//! ```
//!
//! Publication is not part of the pipeline: the committed outbox entry is
//! picked up later by the outbox relay, so a broker outage never rolls back
//! or loses a committed state change.
//!
//! ## Concurrency
//!
//! - `ExpectedVersion::Exact(v)` fails with `ConcurrencyConflict` when the
//!   stored version is not `v`, either on read or at commit time. It is never
//!   retried here; the caller refreshes and decides.
//! - `ExpectedVersion::Any` still commits with a CAS against the version that
//!   was read. A lost race re-reads and re-applies the mutation, up to
//!   `conflict_retries` times, so "don't care" callers get last-write-wins
//!   without lost updates.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use supplyline_core::{
    AggregateId, AlertId, AlertRecord, AlertStatus, DomainError, EventId, ExpectedVersion,
    HistoryRecord, TrackedAggregate, Versioned,
};
use supplyline_events::{AlertEvaluator, IntegrationEvent, OutboxEntry, StateChange};

use crate::store::{AggregateRow, EntityStore, StoreError, UnitOfWork};

/// Pipeline settings shared by every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// `source` field of every integration event (the application name).
    pub source: String,
    /// Subjects are `<subject_prefix>.<event type>`.
    pub subject_prefix: String,
    /// Re-applications allowed for `ExpectedVersion::Any` after a lost CAS.
    pub conflict_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: "supplyline".to_string(),
            subject_prefix: "supplychain".to_string(),
            conflict_retries: 3,
        }
    }
}

impl PipelineConfig {
    pub fn subject_for(&self, event_type: &str) -> String {
        format!("{}.{}", self.subject_prefix, event_type)
    }
}

/// Everything a committed transition produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome<A> {
    pub state: Versioned<A>,
    pub history: HistoryRecord,
    pub alert: Option<AlertRecord>,
    pub outbox: OutboxEntry,
}

/// Transition failure, as surfaced to the caller.
///
/// A transition either fully commits or fails with one of these; nothing is
/// partially visible after an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransitionError {
    /// The mutation rejected the input. Not retryable.
    #[error(transparent)]
    Validation(#[from] DomainError),

    /// The stored version moved. Retry with refreshed state.
    #[error("concurrency conflict on {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: u64,
        actual: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("aggregate already exists: {0}")]
    AlreadyExists(AggregateId),

    /// The unit of work could not be committed. Retryable; nothing was written.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller's deadline passed before commit; nothing was written.
    #[error("transition cancelled before commit")]
    Cancelled,

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid alert transition: {0}")]
    InvalidAlertTransition(String),
}

impl TransitionError {
    /// Whether the same request may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransitionError::ConcurrencyConflict { .. } | TransitionError::StoreUnavailable(_)
        )
    }
}

impl From<StoreError> for TransitionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict {
                aggregate_id,
                expected,
                actual,
            } => TransitionError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            },
            StoreError::Duplicate(id) => TransitionError::AlreadyExists(id),
            StoreError::NotFound(what) => TransitionError::NotFound(what),
            StoreError::Unavailable(msg) => TransitionError::StoreUnavailable(msg),
            StoreError::Serialization(msg) => TransitionError::Serialization(msg),
            StoreError::InvalidTransition(msg) => TransitionError::InvalidAlertTransition(msg),
        }
    }
}

/// Generic repository over an [`EntityStore`].
///
/// Domain crates provide the aggregate type, the mutation, and the alert
/// evaluator; the repository owns versioning, history, alerts, and the outbox.
#[derive(Debug)]
pub struct EntityRepository<S> {
    store: S,
    config: PipelineConfig,
}

impl<S> EntityRepository<S> {
    pub fn new(store: S, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<S: EntityStore> EntityRepository<S> {
    /// Commit the creation of a new aggregate (version 1).
    pub fn create<A, P>(
        &self,
        policy: &P,
        change: StateChange<A>,
    ) -> Result<TransitionOutcome<A>, TransitionError>
    where
        A: TrackedAggregate,
        P: AlertEvaluator<A> + ?Sized,
    {
        let id = change.next.aggregate_id();
        if self.store.load(id)?.is_some() {
            return Err(TransitionError::AlreadyExists(id));
        }

        let draft = policy.evaluate(None, &change.next, &[]);
        let now = Utc::now();
        let (unit, outcome) = self.build_unit(change, draft, None, 1, now, now)?;

        self.store.commit(unit)?;
        info!(
            aggregate_id = %id,
            aggregate_type = A::AGGREGATE_TYPE,
            entry_id = %outcome.outbox.id,
            "aggregate created"
        );
        Ok(outcome)
    }

    /// Apply a state transition.
    ///
    /// `mutation` receives the current state and returns the decided change.
    /// It may be invoked more than once when `expected` is
    /// `ExpectedVersion::Any` and a concurrent writer wins the CAS.
    pub fn apply_transition<A, P, F>(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        policy: &P,
        mutation: F,
    ) -> Result<TransitionOutcome<A>, TransitionError>
    where
        A: TrackedAggregate,
        P: AlertEvaluator<A> + ?Sized,
        F: FnMut(&A) -> Result<StateChange<A>, DomainError>,
    {
        self.transition(id, expected, policy, mutation, None)
    }

    /// Like [`apply_transition`](Self::apply_transition), but gives up with
    /// `Cancelled` if `deadline` passes before the commit point.
    ///
    /// Once committed the transition is durable, whatever the caller does next.
    pub fn apply_transition_before<A, P, F>(
        &self,
        deadline: Instant,
        id: AggregateId,
        expected: ExpectedVersion,
        policy: &P,
        mutation: F,
    ) -> Result<TransitionOutcome<A>, TransitionError>
    where
        A: TrackedAggregate,
        P: AlertEvaluator<A> + ?Sized,
        F: FnMut(&A) -> Result<StateChange<A>, DomainError>,
    {
        self.transition(id, expected, policy, mutation, Some(deadline))
    }

    fn transition<A, P, F>(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        policy: &P,
        mut mutation: F,
        deadline: Option<Instant>,
    ) -> Result<TransitionOutcome<A>, TransitionError>
    where
        A: TrackedAggregate,
        P: AlertEvaluator<A> + ?Sized,
        F: FnMut(&A) -> Result<StateChange<A>, DomainError>,
    {
        let mut retries_left = match expected {
            ExpectedVersion::Any => self.config.conflict_retries,
            ExpectedVersion::Exact(_) => 0,
        };

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TransitionError::Cancelled);
            }

            let row = self.load_row::<A>(id)?;
            if let ExpectedVersion::Exact(v) = expected {
                if v != row.version {
                    return Err(TransitionError::ConcurrencyConflict {
                        aggregate_id: id,
                        expected: v,
                        actual: row.version,
                    });
                }
            }

            let current: A = decode_state(&row)?;
            let change = mutation(&current)?;
            if change.next.aggregate_id() != id {
                return Err(DomainError::invariant("mutation changed the aggregate id").into());
            }

            let open = self.store.open_alerts(id)?;
            let draft = policy.evaluate(Some(&current), &change.next, &open);

            let now = Utc::now();
            let (unit, outcome) =
                self.build_unit(change, draft, Some(row.version), row.version + 1, row.created_at, now)?;

            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!(aggregate_id = %id, "deadline passed before commit");
                return Err(TransitionError::Cancelled);
            }

            match self.store.commit(unit) {
                Ok(()) => {
                    info!(
                        aggregate_id = %id,
                        aggregate_type = A::AGGREGATE_TYPE,
                        version = outcome.state.version,
                        event_type = %outcome.outbox.event_type,
                        alert = outcome.alert.as_ref().map(|a| a.alert_type.as_str()),
                        "transition committed"
                    );
                    return Ok(outcome);
                }
                Err(StoreError::Conflict { actual, .. }) if retries_left > 0 => {
                    retries_left -= 1;
                    debug!(
                        aggregate_id = %id,
                        read_version = row.version,
                        actual,
                        retries_left,
                        "lost version race, re-applying"
                    );
                }
                Err(err) => {
                    warn!(aggregate_id = %id, error = %err, "transition not committed");
                    return Err(err.into());
                }
            }
        }
    }

    fn load_row<A: TrackedAggregate>(&self, id: AggregateId) -> Result<AggregateRow, TransitionError> {
        let row = self
            .store
            .load(id)?
            .ok_or_else(|| TransitionError::NotFound(format!("{} {id}", A::AGGREGATE_TYPE)))?;

        if row.aggregate_type != A::AGGREGATE_TYPE {
            return Err(TransitionError::NotFound(format!(
                "{} {id} (stored as {})",
                A::AGGREGATE_TYPE,
                row.aggregate_type
            )));
        }
        Ok(row)
    }

    fn build_unit<A: TrackedAggregate>(
        &self,
        change: StateChange<A>,
        draft: Option<supplyline_core::AlertDraft>,
        expected_version: Option<u64>,
        version: u64,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(UnitOfWork, TransitionOutcome<A>), TransitionError> {
        let id = change.next.aggregate_id();
        let aggregate_type = A::AGGREGATE_TYPE;

        let alert = draft
            .as_ref()
            .map(|d| AlertRecord::raise(d, id, aggregate_type, now));

        // An alert takes over the event type; the change data stays and the
        // alert details are nested under `alert`.
        let (event_type, data) = match (&draft, &alert) {
            (Some(draft), Some(record)) => {
                let mut data = into_object(change.data);
                data.insert(
                    "alert".to_string(),
                    json!({
                        "id": record.id,
                        "type": record.alert_type,
                        "message": record.message,
                        "status": record.status,
                        "details": draft.details,
                    }),
                );
                (draft.event_type.clone(), JsonValue::Object(data))
            }
            _ => (change.event_type, change.data),
        };

        let event = IntegrationEvent::new(
            EventId::new(),
            event_type.clone(),
            now,
            version,
            self.config.source.clone(),
            data,
        );
        let outbox = OutboxEntry::pending(&event, id, aggregate_type, self.config.subject_for(&event_type))
            .map_err(|e| TransitionError::Serialization(e.to_string()))?;

        let history = HistoryRecord::from_entry(change.history, id, aggregate_type, version, now)
            .with_occurred_at(change.occurred_at);

        let state = serde_json::to_value(&change.next)
            .map_err(|e| TransitionError::Serialization(e.to_string()))?;
        let row = AggregateRow {
            id,
            aggregate_type: aggregate_type.to_string(),
            version,
            state,
            created_at,
            updated_at: now,
        };

        let unit = UnitOfWork {
            row,
            expected_version,
            history: history.clone(),
            alert: alert.clone(),
            outbox: outbox.clone(),
        };
        let outcome = TransitionOutcome {
            state: Versioned::new(change.next, version, created_at, now),
            history,
            alert,
            outbox,
        };
        Ok((unit, outcome))
    }

    /// Current state, or `None` if the aggregate does not exist.
    pub fn load<A: TrackedAggregate>(&self, id: AggregateId) -> Result<Option<Versioned<A>>, TransitionError> {
        match self.store.load(id)? {
            Some(row) if row.aggregate_type == A::AGGREGATE_TYPE => {
                let state: A = decode_state(&row)?;
                Ok(Some(Versioned::new(state, row.version, row.created_at, row.updated_at)))
            }
            _ => Ok(None),
        }
    }

    pub fn history(&self, id: AggregateId) -> Result<Vec<HistoryRecord>, TransitionError> {
        Ok(self.store.history(id)?)
    }

    pub fn alerts_for(&self, id: AggregateId) -> Result<Vec<AlertRecord>, TransitionError> {
        Ok(self.store.alerts_for(id)?)
    }

    pub fn alerts_by_status(&self, status: AlertStatus) -> Result<Vec<AlertRecord>, TransitionError> {
        Ok(self.store.alerts_by_status(status)?)
    }

    pub fn acknowledge_alert(&self, id: AlertId) -> Result<AlertRecord, TransitionError> {
        self.advance_alert(id, AlertStatus::Acknowledged)
    }

    pub fn resolve_alert(&self, id: AlertId) -> Result<AlertRecord, TransitionError> {
        self.advance_alert(id, AlertStatus::Resolved)
    }

    fn advance_alert(&self, id: AlertId, to: AlertStatus) -> Result<AlertRecord, TransitionError> {
        let alert = self.store.update_alert_status(id, to, Utc::now())?;
        info!(alert_id = %id, aggregate_id = %alert.aggregate_id, status = %alert.status, "alert updated");
        Ok(alert)
    }
}

fn decode_state<A: TrackedAggregate>(row: &AggregateRow) -> Result<A, TransitionError> {
    serde_json::from_value(row.state.clone()).map_err(|e| {
        TransitionError::Serialization(format!("{} {}: {e}", row.aggregate_type, row.id))
    })
}

fn into_object(data: JsonValue) -> serde_json::Map<String, JsonValue> {
    match data {
        JsonValue::Object(map) => map,
        JsonValue::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("change".to_string(), other);
            map
        }
    }
}
