use chrono::{DateTime, Utc};

/// A fact emitted by an aggregate when its state changes.
///
/// Implementors are plain serializable structs. The repository wraps them in a
/// [`crate::StateChange`] and later in an [`crate::IntegrationEvent`], so the
/// name returned here becomes the suffix of the broker subject.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted type name, e.g. `inventory.stock.changed` or `shipment.created`.
    fn event_type(&self) -> &'static str;

    /// Business time of the change, as reported by the caller. Serialized into
    /// the event data and carried onto the history record.
    fn occurred_at(&self) -> DateTime<Utc>;
}
