//! Domain events, integration events, the outbox record, and the broker boundary.

pub mod alerting;
pub mod broker;
pub mod change;
pub mod envelope;
pub mod event;
pub mod in_memory_broker;
pub mod outbox;

pub use alerting::{AlertEvaluator, NoAlerts, has_open_alert};
pub use broker::{Ack, BrokerClient, BrokerError, Subscription};
pub use change::StateChange;
pub use envelope::IntegrationEvent;
pub use event::Event;
pub use in_memory_broker::{Deduplicator, Delivery, InMemoryBroker};
pub use outbox::{OutboxEntry, OutboxStatus};
