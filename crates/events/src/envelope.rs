use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use supplyline_core::EventId;

/// Outbound integration event, as consumers see it on the broker.
///
/// Wire shape: `{id, type, timestamp, version, source, data}`.
///
/// Notes:
/// - `id` is stable across redeliveries; consumers deduplicate on it.
/// - `version` is the aggregate version the event resulted from, so consumers
///   can also discard stale updates per aggregate.
/// - `data` is the domain-specific delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    timestamp: DateTime<Utc>,
    version: u64,
    source: String,
    data: JsonValue,
}

impl IntegrationEvent {
    pub fn new(
        id: EventId,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        version: u64,
        source: impl Into<String>,
        data: JsonValue,
    ) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            timestamp,
            version,
            source: source.into(),
            data,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    pub fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
