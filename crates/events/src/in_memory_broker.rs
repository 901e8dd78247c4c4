//! In-memory broker for tests/dev.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::Duration;

use supplyline_core::EventId;

use crate::broker::{Ack, BrokerClient, BrokerError, Subscription};
use crate::envelope::IntegrationEvent;

/// A message accepted by the [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn event(&self) -> Result<IntegrationEvent, serde_json::Error> {
        IntegrationEvent::from_slice(&self.payload)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    deliveries: Vec<Delivery>,
    scripted_failures: VecDeque<BrokerError>,
    latency: Option<Duration>,
    subscribers: Vec<mpsc::Sender<Delivery>>,
}

/// In-memory broker.
///
/// - No IO
/// - Records every accepted message (duplicates included)
/// - Scripted failures and artificial latency for exercising the relay
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next publish fails with `error` (queued, consumed in order).
    pub fn fail_next(&self, error: BrokerError) {
        if let Ok(mut state) = self.state.lock() {
            state.scripted_failures.push_back(error);
        }
    }

    /// Sleep this long inside every publish.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut state) = self.state.lock() {
            state.latency = latency;
        }
    }

    pub fn subscribe(&self) -> Subscription<Delivery> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages.
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.push(tx);
        }

        Subscription::new(rx)
    }

    /// All accepted messages, in acceptance order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state
            .lock()
            .map(|s| s.deliveries.clone())
            .unwrap_or_default()
    }

    /// Event ids of all accepted messages, in acceptance order (duplicates kept).
    pub fn delivered_event_ids(&self) -> Vec<EventId> {
        self.deliveries()
            .iter()
            .filter_map(|d| d.event().ok())
            .map(|e| e.id())
            .collect()
    }
}

impl BrokerClient for InMemoryBroker {
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<Ack, BrokerError> {
        let latency = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| BrokerError::Unavailable("lock poisoned".to_string()))?;
            if let Some(err) = state.scripted_failures.pop_front() {
                return Err(err);
            }
            state.latency
        };

        if let Some(latency) = latency {
            thread::sleep(latency);
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| BrokerError::Unavailable("lock poisoned".to_string()))?;

        let delivery = Delivery {
            subject: subject.to_string(),
            payload: payload.to_vec(),
        };
        let duplicate = state.deliveries.iter().any(|d| d.payload == delivery.payload);
        let broker_id = state.deliveries.len().to_string();

        // Drop any dead subscribers while publishing.
        state
            .subscribers
            .retain(|tx| tx.send(delivery.clone()).is_ok());
        state.deliveries.push(delivery);

        Ok(Ack {
            broker_id: Some(broker_id),
            duplicate,
        })
    }
}

/// Consumer-side deduplication on the stable event id.
///
/// Delivery is at-least-once; consumers that must act once per event keep
/// the ids they have already handled.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<EventId>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `id` is observed.
    pub fn first_sighting(&mut self, id: EventId) -> bool {
        self.seen.insert(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn payload(id: EventId) -> Vec<u8> {
        let event = IntegrationEvent::new(id, "shipment.status_updated", Utc::now(), 1, "test", serde_json::json!({}));
        serde_json::to_vec(&event).unwrap()
    }

    #[test]
    fn records_deliveries_and_flags_duplicates() {
        let broker = InMemoryBroker::new();
        let id = EventId::new();

        let first = broker.publish("a", &payload(id)).unwrap();
        let bytes = broker.deliveries()[0].payload.clone();
        let second = broker.publish("a", &bytes).unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(broker.delivered_event_ids(), vec![id, id]);
    }

    #[test]
    fn scripted_failures_are_consumed_in_order() {
        let broker = InMemoryBroker::new();
        broker.fail_next(BrokerError::Unavailable("down".into()));
        broker.fail_next(BrokerError::Rejected("bad".into()));

        assert!(matches!(broker.publish("a", b"{}"), Err(BrokerError::Unavailable(_))));
        assert!(matches!(broker.publish("a", b"{}"), Err(BrokerError::Rejected(_))));
        assert!(broker.publish("a", b"{}").is_ok());
        assert_eq!(broker.deliveries().len(), 1);
    }

    #[test]
    fn subscribers_receive_accepted_messages() {
        let broker = InMemoryBroker::new();
        let sub = broker.subscribe();

        broker.publish("s", &payload(EventId::new())).unwrap();

        let got = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(got.subject, "s");
    }

    #[test]
    fn deduplicator_accepts_each_id_once() {
        let mut dedup = Deduplicator::new();
        let id = EventId::new();
        assert!(dedup.first_sighting(id));
        assert!(!dedup.first_sighting(id));
        assert_eq!(dedup.len(), 1);
    }
}
