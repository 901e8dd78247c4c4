use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::warn;

use supplyline_events::{Ack, BrokerClient, BrokerError};

/// Bounds every publish attempt by a timeout, whatever the transport does.
///
/// Each attempt runs on its own short-lived thread and answers over a
/// channel. When the timeout fires the caller gets `BrokerError::Timeout`;
/// the attempt keeps running and its eventual ack is logged and dropped, so
/// the entry is retried and may reach the broker twice.
///
/// At most `max_in_flight` attempts (timed out ones included) run at once;
/// beyond that, publishing fails fast with `Unavailable`.
#[derive(Debug)]
pub struct TimedPublisher<B> {
    broker: Arc<B>,
    timeout: Duration,
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
}

impl<B> TimedPublisher<B> {
    pub fn new(broker: Arc<B>, timeout: Duration) -> Self {
        Self {
            broker,
            timeout,
            max_in_flight: 16,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attempts currently running, including abandoned ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<B: BrokerClient + 'static> BrokerClient for TimedPublisher<B> {
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<Ack, BrokerError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= self.max_in_flight {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(BrokerError::Unavailable(format!(
                "{} publish attempts still in flight",
                self.max_in_flight
            )));
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let (tx, rx) = mpsc::channel();
        let broker = Arc::clone(&self.broker);
        let subject_owned = subject.to_string();
        let payload = payload.to_vec();

        thread::Builder::new()
            .name("outbox-publish".to_string())
            .spawn(move || {
                let _guard = guard;
                let result = broker.publish(&subject_owned, &payload);
                if tx.send(result).is_err() {
                    warn!(subject = %subject_owned, "broker answered after the attempt timed out; ignored");
                }
            })
            .map_err(|e| BrokerError::Unavailable(format!("cannot spawn publisher: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(BrokerError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(BrokerError::Unavailable(
                "publisher thread exited without an answer".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use supplyline_events::InMemoryBroker;

    use super::*;

    #[test]
    fn fast_broker_answers_within_timeout() {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = TimedPublisher::new(Arc::clone(&broker), Duration::from_secs(1));

        let ack = publisher.publish("a.b", b"{}").unwrap();
        assert_eq!(ack.broker_id.as_deref(), Some("0"));
        assert_eq!(broker.deliveries().len(), 1);
    }

    #[test]
    fn slow_broker_times_out_and_late_ack_is_dropped() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_latency(Some(Duration::from_millis(200)));
        let publisher = TimedPublisher::new(Arc::clone(&broker), Duration::from_millis(20));

        let err = publisher.publish("a.b", b"{}").unwrap_err();
        assert_eq!(err, BrokerError::Timeout(Duration::from_millis(20)));

        // the abandoned attempt still lands; that is the duplicate consumers dedupe
        thread::sleep(Duration::from_millis(400));
        assert_eq!(broker.deliveries().len(), 1);
        assert_eq!(publisher.in_flight(), 0);
    }

    #[test]
    fn too_many_abandoned_attempts_fail_fast() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_latency(Some(Duration::from_millis(300)));
        let publisher =
            TimedPublisher::new(Arc::clone(&broker), Duration::from_millis(10)).with_max_in_flight(1);

        assert!(matches!(publisher.publish("a", b"1"), Err(BrokerError::Timeout(_))));
        assert!(matches!(publisher.publish("a", b"2"), Err(BrokerError::Unavailable(_))));
    }

    #[test]
    fn broker_errors_pass_through() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_next(BrokerError::Rejected("bad subject".into()));
        let publisher = TimedPublisher::new(broker, Duration::from_secs(1));

        assert_eq!(
            publisher.publish("a", b"{}"),
            Err(BrokerError::Rejected("bad subject".into()))
        );
    }
}
