//! Configurable shipment alert rules.

use chrono::Duration;
use serde_json::json;

use supplyline_core::{AlertDraft, AlertRecord};
use supplyline_events::{AlertEvaluator, has_open_alert};

use crate::shipment::{Shipment, ShipmentStatus};

pub const DELAY: &str = "delay";
pub const LATE_DELIVERY: &str = "late_delivery";
pub const CANCELLED: &str = "cancelled";

/// One alert rule, matched against a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipmentAlertRule {
    /// Still (or newly) `in_transit` and the report is later than
    /// `estimated_arrival + grace`.
    Delay { grace: Duration },
    /// Transition into `delivered` later than `estimated_arrival + grace`.
    LateDelivery { grace: Duration },
    /// Transition into `cancelled`.
    Cancelled,
}

impl ShipmentAlertRule {
    pub fn alert_type(&self) -> &'static str {
        match self {
            ShipmentAlertRule::Delay { .. } => DELAY,
            ShipmentAlertRule::LateDelivery { .. } => LATE_DELIVERY,
            ShipmentAlertRule::Cancelled => CANCELLED,
        }
    }

    fn matches(&self, previous: Option<&Shipment>, next: &Shipment) -> Option<AlertDraft> {
        let alert_type = self.alert_type();
        let event_type = format!("shipment.alert.{alert_type}");

        match *self {
            ShipmentAlertRule::Delay { grace } => {
                if next.status() != ShipmentStatus::InTransit {
                    return None;
                }
                let deadline = next.estimated_arrival()?.checked_add_signed(grace)?;
                if next.last_status_at() <= deadline {
                    return None;
                }
                Some(
                    AlertDraft::new(
                        alert_type,
                        event_type,
                        format!("Shipment for order {} is delayed", next.order_id()),
                    )
                    .with_details(json!({
                        "order_id": next.order_id(),
                        "deadline": deadline,
                        "reported_at": next.last_status_at(),
                        "location": next.current_location(),
                    })),
                )
            }
            ShipmentAlertRule::LateDelivery { grace } => {
                let entered = next.status() == ShipmentStatus::Delivered
                    && previous.is_none_or(|p| p.status() != ShipmentStatus::Delivered);
                if !entered {
                    return None;
                }
                let deadline = next.estimated_arrival()?.checked_add_signed(grace)?;
                let arrived = next.actual_arrival().unwrap_or(next.last_status_at());
                if arrived <= deadline {
                    return None;
                }
                Some(
                    AlertDraft::new(
                        alert_type,
                        event_type,
                        format!("Shipment for order {} was delivered late", next.order_id()),
                    )
                    .with_details(json!({
                        "order_id": next.order_id(),
                        "deadline": deadline,
                        "actual_arrival": arrived,
                    })),
                )
            }
            ShipmentAlertRule::Cancelled => {
                let entered = next.status() == ShipmentStatus::Cancelled
                    && previous.is_none_or(|p| p.status() != ShipmentStatus::Cancelled);
                if !entered {
                    return None;
                }
                Some(
                    AlertDraft::new(
                        alert_type,
                        event_type,
                        format!("Shipment for order {} was cancelled", next.order_id()),
                    )
                    .with_details(json!({
                        "order_id": next.order_id(),
                        "prev_status": previous.map(|p| p.status()),
                    })),
                )
            }
        }
    }
}

/// Ordered rule set; the first matching rule whose alert type is not already
/// open wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentAlertPolicy {
    rules: Vec<ShipmentAlertRule>,
}

impl ShipmentAlertPolicy {
    pub fn new(rules: Vec<ShipmentAlertRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ShipmentAlertRule] {
        &self.rules
    }
}

impl Default for ShipmentAlertPolicy {
    fn default() -> Self {
        Self::new(vec![
            ShipmentAlertRule::Delay {
                grace: Duration::zero(),
            },
            ShipmentAlertRule::LateDelivery {
                grace: Duration::zero(),
            },
            ShipmentAlertRule::Cancelled,
        ])
    }
}

impl AlertEvaluator<Shipment> for ShipmentAlertPolicy {
    fn evaluate(
        &self,
        previous: Option<&Shipment>,
        next: &Shipment,
        open_alerts: &[AlertRecord],
    ) -> Option<AlertDraft> {
        self.rules
            .iter()
            .filter(|rule| !has_open_alert(open_alerts, rule.alert_type()))
            .find_map(|rule| rule.matches(previous, next))
    }
}
