//! Stock-level alert rules.

use serde_json::json;

use supplyline_core::{AlertDraft, AlertRecord};
use supplyline_events::{AlertEvaluator, has_open_alert};

use crate::level::InventoryLevel;

pub const LOW_STOCK: &str = "low_stock";
pub const OVERSTOCK: &str = "overstock";

/// Raises `low_stock` when `quantity <= min_quantity` and `overstock` when
/// `quantity > max_quantity` (a zero max disables the overstock check).
///
/// Each alert type is raised at most once while an unresolved alert of the
/// same type is open for the inventory line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryAlertPolicy {
    pub low_stock: bool,
    pub overstock: bool,
}

impl Default for InventoryAlertPolicy {
    fn default() -> Self {
        Self {
            low_stock: true,
            overstock: true,
        }
    }
}

impl InventoryAlertPolicy {
    pub fn low_stock_only() -> Self {
        Self {
            low_stock: true,
            overstock: false,
        }
    }
}

impl AlertEvaluator<InventoryLevel> for InventoryAlertPolicy {
    fn evaluate(
        &self,
        _previous: Option<&InventoryLevel>,
        next: &InventoryLevel,
        open_alerts: &[AlertRecord],
    ) -> Option<AlertDraft> {
        if self.low_stock
            && next.quantity() <= next.min_quantity()
            && !has_open_alert(open_alerts, LOW_STOCK)
        {
            return Some(
                AlertDraft::new(
                    LOW_STOCK,
                    "inventory.alert.low_stock",
                    format!("Low stock alert for product {}", next.product_id()),
                )
                .with_details(json!({
                    "product_id": next.product_id(),
                    "location_id": next.location_id(),
                    "threshold": next.min_quantity(),
                    "current_level": next.quantity(),
                })),
            );
        }

        if self.overstock
            && next.max_quantity() > 0
            && next.quantity() > next.max_quantity()
            && !has_open_alert(open_alerts, OVERSTOCK)
        {
            return Some(
                AlertDraft::new(
                    OVERSTOCK,
                    "inventory.alert.overstock",
                    format!("Overstock alert for product {}", next.product_id()),
                )
                .with_details(json!({
                    "product_id": next.product_id(),
                    "location_id": next.location_id(),
                    "threshold": next.max_quantity(),
                    "current_level": next.quantity(),
                })),
            );
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use supplyline_core::{AggregateId, AlertStatus};

    use super::*;
    use crate::level::{CreateInventory, SetQuantity};

    fn level(quantity: i64, min: i64, max: i64) -> InventoryLevel {
        InventoryLevel::create(&CreateInventory {
            inventory_id: AggregateId::new(),
            product_id: "sku-7".to_string(),
            location_id: "wh-1".to_string(),
            quantity,
            min_quantity: min,
            max_quantity: max,
            occurred_at: Utc::now(),
        })
        .unwrap()
        .next
    }

    fn with_quantity(level: &InventoryLevel, quantity: i64) -> InventoryLevel {
        level
            .set_quantity(&SetQuantity {
                quantity,
                reason: None,
                occurred_at: Utc::now(),
            })
            .unwrap()
            .next
    }

    fn raise(draft: &AlertDraft, level: &InventoryLevel) -> AlertRecord {
        AlertRecord::raise(draft, level.id(), "inventory", Utc::now())
    }

    #[test]
    fn breach_raises_low_stock() {
        let before = level(100, 20, 0);
        let after = with_quantity(&before, 15);

        let draft = InventoryAlertPolicy::default()
            .evaluate(Some(&before), &after, &[])
            .unwrap();

        assert_eq!(draft.alert_type, LOW_STOCK);
        assert_eq!(draft.event_type, "inventory.alert.low_stock");
        assert_eq!(draft.message, "Low stock alert for product sku-7");
        assert_eq!(draft.details["threshold"], 20);
        assert_eq!(draft.details["current_level"], 15);
    }

    #[test]
    fn quantity_equal_to_min_is_a_breach() {
        let after = level(20, 20, 0);
        assert!(InventoryAlertPolicy::default().evaluate(None, &after, &[]).is_some());
    }

    #[test]
    fn open_alert_suppresses_repeat() {
        let before = level(15, 20, 0);
        let after = with_quantity(&before, 10);
        let policy = InventoryAlertPolicy::default();

        let first = policy.evaluate(None, &before, &[]).unwrap();
        let open = vec![raise(&first, &before)];

        assert!(policy.evaluate(Some(&before), &after, &open).is_none());
    }

    #[test]
    fn resolved_alert_allows_a_new_one() {
        let after = level(5, 20, 0);
        let policy = InventoryAlertPolicy::default();

        let draft = policy.evaluate(None, &after, &[]).unwrap();
        let mut alert = raise(&draft, &after);
        alert.advance(AlertStatus::Resolved, Utc::now()).unwrap();

        assert!(policy.evaluate(None, &after, &[alert]).is_some());
    }

    #[test]
    fn overstock_only_when_max_is_set() {
        let policy = InventoryAlertPolicy::default();

        let unbounded = level(10_000, 20, 0);
        assert!(policy.evaluate(None, &unbounded, &[]).is_none());

        let bounded = level(600, 20, 500);
        let draft = policy.evaluate(None, &bounded, &[]).unwrap();
        assert_eq!(draft.alert_type, OVERSTOCK);
        assert_eq!(draft.event_type, "inventory.alert.overstock");

        assert!(InventoryAlertPolicy::low_stock_only()
            .evaluate(None, &bounded, &[])
            .is_none());
    }

    #[test]
    fn unbounded_line_still_alerts_on_low_stock() {
        let before = level(100, 20, 0);
        let policy = InventoryAlertPolicy::default();
        assert!(policy.evaluate(None, &before, &[]).is_none());

        let after = with_quantity(&before, 20);
        let draft = policy.evaluate(Some(&before), &after, &[]).unwrap();
        assert_eq!(draft.alert_type, LOW_STOCK);
    }

    #[test]
    fn healthy_levels_raise_nothing() {
        let after = level(100, 20, 500);
        assert!(InventoryAlertPolicy::default().evaluate(None, &after, &[]).is_none());
    }

    proptest! {
        // Feeding every raised alert back as open never yields a second
        // unresolved low_stock alert, whatever the sequence of quantities.
        #[test]
        fn low_stock_is_raised_at_most_once_while_open(
            quantities in proptest::collection::vec(0i64..40, 1..30)
        ) {
            let policy = InventoryAlertPolicy::low_stock_only();
            let mut current = level(100, 20, 0);
            let mut open: Vec<AlertRecord> = Vec::new();

            for q in quantities {
                let next = with_quantity(&current, q);
                if let Some(draft) = policy.evaluate(Some(&current), &next, &open) {
                    open.push(raise(&draft, &next));
                }
                current = next;
            }

            let unresolved = open
                .iter()
                .filter(|a| a.alert_type == LOW_STOCK && a.is_open())
                .count();
            prop_assert!(unresolved <= 1);
        }
    }
}
