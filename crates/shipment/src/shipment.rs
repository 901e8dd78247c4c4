use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use supplyline_core::{AggregateId, DomainError, DomainResult, HistoryEntry, TrackedAggregate};
use supplyline_events::{Event, StateChange};

/// Shipment lifecycle.
///
/// ```text
/// pending ──► in_transit ──► delivered
///    │          │  ▲
///    │          └──┘ (location updates)
///    └──────────┴───► cancelled
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        matches!(
            (self, next),
            (Pending, InTransit)
                | (Pending, Cancelled)
                | (InTransit, InTransit)
                | (InTransit, Delivered)
                | (InTransit, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ShipmentStatus::Pending),
            "in_transit" => Ok(ShipmentStatus::InTransit),
            "delivered" => Ok(ShipmentStatus::Delivered),
            "cancelled" => Ok(ShipmentStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown shipment status: {other}"))),
        }
    }
}

/// Aggregate root: Shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    id: AggregateId,
    order_id: String,
    status: ShipmentStatus,
    origin: String,
    destination: String,
    carrier_id: Option<String>,
    tracking_number: Option<String>,
    notes: Option<String>,
    current_location: Option<String>,
    estimated_arrival: Option<DateTime<Utc>>,
    actual_arrival: Option<DateTime<Utc>>,
    /// When the status (or location) was last reported.
    last_status_at: DateTime<Utc>,
}

impl TrackedAggregate for Shipment {
    const AGGREGATE_TYPE: &'static str = "shipment";

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }
}

impl Shipment {
    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn status(&self) -> ShipmentStatus {
        self.status
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn carrier_id(&self) -> Option<&str> {
        self.carrier_id.as_deref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn current_location(&self) -> Option<&str> {
        self.current_location.as_deref()
    }

    pub fn estimated_arrival(&self) -> Option<DateTime<Utc>> {
        self.estimated_arrival
    }

    pub fn actual_arrival(&self) -> Option<DateTime<Utc>> {
        self.actual_arrival
    }

    pub fn last_status_at(&self) -> DateTime<Utc> {
        self.last_status_at
    }
}

/// Command: CreateShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShipment {
    pub shipment_id: AggregateId,
    pub order_id: String,
    pub origin: String,
    pub destination: String,
    pub carrier_id: Option<String>,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateStatus (new status + optional location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub status: ShipmentStatus,
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateLocation (status unchanged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLocation {
    pub location: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCreated {
    pub shipment_id: AggregateId,
    pub order_id: String,
    pub origin: String,
    pub destination: String,
    pub carrier_id: Option<String>,
    pub tracking_number: Option<String>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentStatusUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentStatusUpdated {
    pub shipment_id: AggregateId,
    pub order_id: String,
    pub status: ShipmentStatus,
    pub prev_status: ShipmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

impl Event for ShipmentCreated {
    fn event_type(&self) -> &'static str {
        "shipment.created"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Event for ShipmentStatusUpdated {
    fn event_type(&self) -> &'static str {
        "shipment.status_updated"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

fn required(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

impl Shipment {
    /// Decide the creation of a new shipment (status `pending`).
    pub fn create(cmd: &CreateShipment) -> DomainResult<StateChange<Shipment>> {
        required("order_id", &cmd.order_id)?;
        required("origin", &cmd.origin)?;
        required("destination", &cmd.destination)?;

        let shipment = Shipment {
            id: cmd.shipment_id,
            order_id: cmd.order_id.clone(),
            status: ShipmentStatus::Pending,
            origin: cmd.origin.clone(),
            destination: cmd.destination.clone(),
            carrier_id: cmd.carrier_id.clone(),
            tracking_number: cmd.tracking_number.clone(),
            notes: cmd.notes.clone(),
            current_location: Some(cmd.origin.clone()),
            estimated_arrival: cmd.estimated_arrival,
            actual_arrival: None,
            last_status_at: cmd.occurred_at,
        };

        let event = ShipmentCreated {
            shipment_id: cmd.shipment_id,
            order_id: cmd.order_id.clone(),
            origin: cmd.origin.clone(),
            destination: cmd.destination.clone(),
            carrier_id: cmd.carrier_id.clone(),
            tracking_number: cmd.tracking_number.clone(),
            estimated_arrival: cmd.estimated_arrival,
            occurred_at: cmd.occurred_at,
        };
        let history = HistoryEntry::value("created", serde_json::json!({ "status": "pending" }))
            .with_note("Shipment created");

        StateChange::new(shipment, history, &event)
    }

    /// Apply a status report (history kind `status_changed`).
    pub fn update_status(&self, cmd: &UpdateStatus) -> DomainResult<StateChange<Shipment>> {
        if !self.status.can_transition_to(cmd.status) {
            return Err(DomainError::validation(format!(
                "shipment cannot move from {} to {}",
                self.status, cmd.status
            )));
        }
        if let Some(location) = &cmd.location {
            required("location", location)?;
        }

        let mut next = self.clone();
        next.status = cmd.status;
        next.last_status_at = cmd.occurred_at;
        if cmd.location.is_some() {
            next.current_location = cmd.location.clone();
        }
        if cmd.status == ShipmentStatus::Delivered {
            next.actual_arrival = Some(cmd.occurred_at);
            next.current_location = Some(self.destination.clone());
        }

        let description = format!("Status updated to: {}", cmd.status);
        let mut history = HistoryEntry::value(
            "status_changed",
            serde_json::json!({ "status": cmd.status, "location": cmd.location }),
        )
        .with_note(description.clone());
        if self.status == cmd.status && cmd.location.is_some() {
            history.kind = "location_updated".to_string();
        }

        self.status_event(next, history, cmd.location.clone(), description, cmd.occurred_at)
    }

    /// Report a new position without changing the status (history kind `location_updated`).
    pub fn update_location(&self, cmd: &UpdateLocation) -> DomainResult<StateChange<Shipment>> {
        if self.status.is_terminal() {
            return Err(DomainError::validation(format!(
                "cannot update location of a {} shipment",
                self.status
            )));
        }
        required("location", &cmd.location)?;

        let mut next = self.clone();
        next.current_location = Some(cmd.location.clone());
        next.last_status_at = cmd.occurred_at;

        let description = format!("Location updated to: {}", cmd.location);
        let history =
            HistoryEntry::value("location_updated", serde_json::json!({ "location": cmd.location }))
                .with_note(description.clone());

        self.status_event(next, history, Some(cmd.location.clone()), description, cmd.occurred_at)
    }

    fn status_event(
        &self,
        next: Shipment,
        history: HistoryEntry,
        location: Option<String>,
        description: String,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<StateChange<Shipment>> {
        let event = ShipmentStatusUpdated {
            shipment_id: self.id,
            order_id: self.order_id.clone(),
            status: next.status,
            prev_status: self.status,
            location,
            description,
            occurred_at,
        };
        StateChange::new(next, history, &event)
    }
}
