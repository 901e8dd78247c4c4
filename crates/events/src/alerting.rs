//! Alert evaluation boundary.

use supplyline_core::{AlertDraft, AlertRecord};

/// Pure mapping from a state transition to zero-or-one alerts.
///
/// Implementations must not perform IO. `open_alerts` are the aggregate's
/// unresolved alerts at the time the transition was read, so evaluators can
/// stay idempotent (no duplicate alert while one of the same type is open).
///
/// `previous` is `None` when the aggregate is being created.
pub trait AlertEvaluator<A>: Send + Sync {
    fn evaluate(&self, previous: Option<&A>, next: &A, open_alerts: &[AlertRecord])
        -> Option<AlertDraft>;
}

/// Evaluator that never raises anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAlerts;

impl<A> AlertEvaluator<A> for NoAlerts {
    fn evaluate(&self, _: Option<&A>, _: &A, _: &[AlertRecord]) -> Option<AlertDraft> {
        None
    }
}

/// Whether an unresolved alert of `alert_type` is already open.
pub fn has_open_alert(open_alerts: &[AlertRecord], alert_type: &str) -> bool {
    open_alerts
        .iter()
        .any(|a| a.is_open() && a.alert_type == alert_type)
}
