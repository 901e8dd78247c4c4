//! Outbox entries: events staged in the same store as the state change.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use supplyline_core::{AggregateId, DomainError, EventId};

use crate::envelope::IntegrationEvent;

/// Delivery status of an outbox entry.
///
/// `pending → published`, or `pending → failed → ... → published`. An entry that
/// exhausts its attempts becomes `dead_lettered` and waits for an operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
    DeadLettered,
}

impl OutboxStatus {
    /// Still owed to the broker (relay should eventually pick it up).
    pub fn is_undelivered(self) -> bool {
        matches!(self, OutboxStatus::Pending | OutboxStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl core::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            "dead_lettered" => Ok(OutboxStatus::DeadLettered),
            other => Err(DomainError::validation(format!("unknown outbox status: {other}"))),
        }
    }
}

/// An event awaiting (or done with) publication.
///
/// The entry id doubles as the integration event id, so every redelivery of
/// the same entry carries the same `id` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// Aggregate version the event resulted from.
    pub aggregate_version: u64,
    pub subject: String,
    pub event_type: String,
    /// Serialized [`IntegrationEvent`].
    pub payload: JsonValue,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// Stage an integration event for `subject`.
    pub fn pending(
        event: &IntegrationEvent,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        subject: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: event.id(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            aggregate_version: event.version(),
            subject: subject.into(),
            event_type: event.event_type().to_string(),
            payload: event.to_json()?,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: event.timestamp(),
            last_attempt_at: None,
            next_attempt_at: None,
            published_at: None,
            last_error: None,
        })
    }

    /// Whether the relay may attempt this entry at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_undelivered() && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.payload)
    }

    /// Record a broker acknowledgment.
    pub fn mark_published(&mut self, at: DateTime<Utc>) {
        self.status = OutboxStatus::Published;
        self.attempts += 1;
        self.last_attempt_at = Some(at);
        self.published_at = Some(at);
        self.next_attempt_at = None;
        self.last_error = None;
    }

    /// Record a failed attempt.
    ///
    /// `retry_at = None` means attempts are exhausted: the entry is dead-lettered.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        at: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) {
        self.attempts += 1;
        self.last_attempt_at = Some(at);
        self.last_error = Some(error.into());
        match retry_at {
            Some(next) => {
                self.status = OutboxStatus::Failed;
                self.next_attempt_at = Some(next);
            }
            None => {
                self.status = OutboxStatus::DeadLettered;
                self.next_attempt_at = None;
            }
        }
    }

    /// Manual intervention: make a dead-lettered entry eligible again.
    pub fn requeue(&mut self) {
        self.status = OutboxStatus::Pending;
        self.attempts = 0;
        self.next_attempt_at = None;
    }
}
