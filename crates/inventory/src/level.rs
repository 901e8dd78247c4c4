use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use supplyline_core::{AggregateId, DomainError, DomainResult, HistoryEntry, TrackedAggregate};
use supplyline_events::{Event, StateChange};

/// Aggregate root: stock level of one product at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    id: AggregateId,
    product_id: String,
    location_id: String,
    quantity: i64,
    min_quantity: i64,
    max_quantity: i64,
}

impl TrackedAggregate for InventoryLevel {
    const AGGREGATE_TYPE: &'static str = "inventory";

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }
}

impl InventoryLevel {
    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn min_quantity(&self) -> i64 {
        self.min_quantity
    }

    pub fn max_quantity(&self) -> i64 {
        self.max_quantity
    }
}

/// Command: CreateInventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInventory {
    pub inventory_id: AggregateId,
    pub product_id: String,
    pub location_id: String,
    pub quantity: i64,
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetQuantity (absolute stock count, e.g. after a stock take).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetQuantity {
    pub quantity: i64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock / ShipStock (relative movements).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStock {
    pub quantity: i64,
    /// PO number, shipment id, etc.
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetThresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetThresholds {
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InventoryCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCreated {
    pub inventory_id: AggregateId,
    pub product_id: String,
    pub location_id: String,
    pub quantity: i64,
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChanged {
    pub inventory_id: AggregateId,
    pub product_id: String,
    pub location_id: String,
    pub quantity: i64,
    pub prev_quantity: i64,
    pub delta: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ThresholdsChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdsChanged {
    pub inventory_id: AggregateId,
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

impl Event for InventoryCreated {
    fn event_type(&self) -> &'static str {
        "inventory.created"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Event for StockChanged {
    fn event_type(&self) -> &'static str {
        "inventory.stock.changed"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Event for ThresholdsChanged {
    fn event_type(&self) -> &'static str {
        "inventory.updated"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

fn validate_thresholds(min_quantity: i64, max_quantity: i64) -> DomainResult<()> {
    if min_quantity < 0 {
        return Err(DomainError::validation("min_quantity cannot be negative"));
    }
    if max_quantity < 0 {
        return Err(DomainError::validation("max_quantity cannot be negative"));
    }
    // max 0 disables the overstock limit
    if max_quantity != 0 && max_quantity < min_quantity {
        return Err(DomainError::validation(
            "max_quantity cannot be lower than min_quantity",
        ));
    }
    Ok(())
}

impl InventoryLevel {
    /// Decide the creation of a new inventory line.
    pub fn create(cmd: &CreateInventory) -> DomainResult<StateChange<InventoryLevel>> {
        if cmd.product_id.trim().is_empty() {
            return Err(DomainError::validation("product_id cannot be empty"));
        }
        if cmd.location_id.trim().is_empty() {
            return Err(DomainError::validation("location_id cannot be empty"));
        }
        if cmd.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        validate_thresholds(cmd.min_quantity, cmd.max_quantity)?;

        let level = InventoryLevel {
            id: cmd.inventory_id,
            product_id: cmd.product_id.clone(),
            location_id: cmd.location_id.clone(),
            quantity: cmd.quantity,
            min_quantity: cmd.min_quantity,
            max_quantity: cmd.max_quantity,
        };

        let event = InventoryCreated {
            inventory_id: cmd.inventory_id,
            product_id: cmd.product_id.clone(),
            location_id: cmd.location_id.clone(),
            quantity: cmd.quantity,
            min_quantity: cmd.min_quantity,
            max_quantity: cmd.max_quantity,
            occurred_at: cmd.occurred_at,
        };
        let history = HistoryEntry::delta("created", cmd.quantity);

        StateChange::new(level, history, &event)
    }

    /// Set the absolute quantity (history kind `adjusted`).
    pub fn set_quantity(&self, cmd: &SetQuantity) -> DomainResult<StateChange<InventoryLevel>> {
        if cmd.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        let mut history = HistoryEntry::delta("adjusted", cmd.quantity - self.quantity);
        if let Some(reason) = &cmd.reason {
            history = history.with_note(reason.clone());
        }
        self.stock_change(cmd.quantity, history, cmd.reason.clone(), cmd.occurred_at)
    }

    /// Goods received into this location (history kind `received`).
    pub fn receive(&self, cmd: &MoveStock) -> DomainResult<StateChange<InventoryLevel>> {
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        let next = self
            .quantity
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::validation("quantity overflow"))?;
        let mut history = HistoryEntry::delta("received", cmd.quantity);
        if let Some(reference) = &cmd.reference {
            history = history.with_note(reference.clone());
        }
        self.stock_change(next, history, cmd.reference.clone(), cmd.occurred_at)
    }

    /// Goods shipped out of this location (history kind `shipped`).
    pub fn ship(&self, cmd: &MoveStock) -> DomainResult<StateChange<InventoryLevel>> {
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("shipped quantity must be positive"));
        }
        let next = self.quantity - cmd.quantity;
        if next < 0 {
            return Err(DomainError::validation(format!(
                "cannot ship {} units, only {} in stock",
                cmd.quantity, self.quantity
            )));
        }
        let mut history = HistoryEntry::delta("shipped", -cmd.quantity);
        if let Some(reference) = &cmd.reference {
            history = history.with_note(reference.clone());
        }
        self.stock_change(next, history, cmd.reference.clone(), cmd.occurred_at)
    }

    /// Change the alerting thresholds (history kind `thresholds_changed`).
    pub fn set_thresholds(&self, cmd: &SetThresholds) -> DomainResult<StateChange<InventoryLevel>> {
        validate_thresholds(cmd.min_quantity, cmd.max_quantity)?;

        let mut next = self.clone();
        next.min_quantity = cmd.min_quantity;
        next.max_quantity = cmd.max_quantity;

        let event = ThresholdsChanged {
            inventory_id: self.id,
            min_quantity: cmd.min_quantity,
            max_quantity: cmd.max_quantity,
            occurred_at: cmd.occurred_at,
        };
        let history = HistoryEntry::value(
            "thresholds_changed",
            serde_json::json!({ "min_quantity": cmd.min_quantity, "max_quantity": cmd.max_quantity }),
        );

        StateChange::new(next, history, &event)
    }

    fn stock_change(
        &self,
        quantity: i64,
        history: HistoryEntry,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<StateChange<InventoryLevel>> {
        let mut next = self.clone();
        next.quantity = quantity;

        let event = StockChanged {
            inventory_id: self.id,
            product_id: self.product_id.clone(),
            location_id: self.location_id.clone(),
            quantity,
            prev_quantity: self.quantity,
            delta: quantity - self.quantity,
            reason,
            occurred_at,
        };

        StateChange::new(next, history, &event)
    }
}
