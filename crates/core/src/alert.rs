//! Alert records and their forward-only lifecycle.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{AggregateId, AlertId};

/// Alert lifecycle: `new → acknowledged → resolved`.
///
/// Transitions only move forward; `new → resolved` skips acknowledgement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    /// Unresolved alerts suppress new alerts of the same type.
    pub fn is_open(self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }

    pub fn can_advance_to(self, next: AlertStatus) -> bool {
        next > self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl core::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(AlertStatus::New),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(DomainError::validation(format!("unknown alert status: {other}"))),
        }
    }
}

/// An alert decided by an alert evaluator, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    /// Alert type, e.g. `"low_stock"`, `"delay"`.
    pub alert_type: String,
    pub message: String,
    /// Integration event type announcing the alert, e.g. `"inventory.alert.low_stock"`.
    pub event_type: String,
    /// Domain-specific details (threshold, current level, deadline, ...).
    pub details: JsonValue,
}

impl AlertDraft {
    pub fn new(
        alert_type: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type: alert_type.into(),
            message: message.into(),
            event_type: event_type.into(),
            details: JsonValue::Null,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }
}

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: AlertId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub alert_type: String,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRecord {
    /// Materialize a draft as a fresh `new` alert.
    pub fn raise(
        draft: &AlertDraft,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertId::new(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            alert_type: draft.alert_type.clone(),
            message: draft.message.clone(),
            status: AlertStatus::New,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Move the alert forward in its lifecycle.
    pub fn advance(&mut self, to: AlertStatus, at: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_advance_to(to) {
            return Err(DomainError::invariant(format!(
                "alert {} cannot move from {} to {}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        self.updated_at = at;
        Ok(())
    }
}
