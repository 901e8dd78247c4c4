//! Aggregate contracts for state-stored, versioned domain models.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;

/// Something the repository can load, version and store.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Bumped by exactly one per committed transition. Starts at 1 on create.
    fn version(&self) -> u64;
}

/// What the caller believes the aggregate's current version is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Caller does not care which version it mutates (last-write-wins).
    ///
    /// The store still compares-and-swaps against the version that was read,
    /// so a concurrent writer is never silently overwritten.
    Any,
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Inbound requests carry an optional version; empty means "don't care".
impl From<Option<u64>> for ExpectedVersion {
    fn from(value: Option<u64>) -> Self {
        match value {
            Some(v) => ExpectedVersion::Exact(v),
            None => ExpectedVersion::Any,
        }
    }
}

/// A domain aggregate whose current state is stored (not replayed).
///
/// Implementations are plain serializable structs holding the domain fields
/// only; versioning and timestamps live in [`Versioned`].
pub trait TrackedAggregate:
    Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable aggregate type name, e.g. `"inventory"`.
    const AGGREGATE_TYPE: &'static str;

    fn aggregate_id(&self) -> AggregateId;
}

/// Aggregate state together with its version and lifecycle timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<A> {
    pub id: AggregateId,
    pub state: A,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<A: TrackedAggregate> Versioned<A> {
    pub fn new(state: A, version: u64, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: state.aggregate_id(),
            state,
            version,
            created_at,
            updated_at,
        }
    }
}

impl<A> Versioned<A> {
    pub fn into_state(self) -> A {
        self.state
    }
}

impl<A> AggregateRoot for Versioned<A> {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
