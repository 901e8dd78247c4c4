use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{OutboxStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Relay progress as seen from the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Entries still owed to the broker
    pub backlog: u64,
    /// Reported, but never makes the relay unhealthy on its own
    pub dead_lettered: u64,
    pub oldest_pending_age: Option<Duration>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Thresholds beyond which the relay is considered stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHealth {
    pub max_backlog: u64,
    pub max_lag: Duration,
}

impl Default for RelayHealth {
    fn default() -> Self {
        Self {
            max_backlog: 10_000,
            max_lag: Duration::from_secs(300),
        }
    }
}

impl RelayHealth {
    pub fn check<S: OutboxStore + ?Sized>(&self, store: &S, now: DateTime<Utc>) -> Result<HealthReport, StoreError> {
        let stats = store.stats()?;
        let backlog = stats.backlog();
        let oldest_pending_age = stats
            .oldest_undelivered_at
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO));

        let lagging = oldest_pending_age.is_some_and(|age| age > self.max_lag);
        let status = if backlog > self.max_backlog || lagging {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };

        Ok(HealthReport {
            status,
            backlog,
            dead_lettered: stats.dead_lettered,
            oldest_pending_age,
        })
    }
}
