//! Outbox relay: moves committed outbox entries to the broker.
//!
//! The relay is the only component that talks to the broker. It polls the
//! outbox for due entries, publishes each one with a bounded attempt, and
//! records the outcome:
//!
//! - ack → `published`
//! - error or timeout → `failed` with `next_attempt_at` from the [`RetryPolicy`]
//! - out of attempts → `dead_lettered` (requeued manually)
//!
//! Delivery is at-least-once. A crash between the broker ack and
//! `mark_published` republishes the entry with the same event id on restart.
//!
//! Within one aggregate, entries are published in commit order: the store
//! holds back an aggregate whose oldest entry is still backing off, and
//! within a cycle a failure defers the aggregate's remaining entries.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use supplyline_core::AggregateId;
use supplyline_events::{BrokerClient, OutboxEntry};

use super::retry::RetryPolicy;
use super::timed::TimedPublisher;
use crate::store::{OutboxStore, StoreError};

/// Relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Thread name and log field
    pub name: String,
    /// Pause between cycles when the outbox had nothing more to send
    pub poll_interval: Duration,
    /// Entries fetched per cycle
    pub batch_size: usize,
    /// Upper bound of a single publish attempt
    pub publish_timeout: Duration,
    /// Abandoned (timed out) attempts allowed to linger
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: "outbox-relay".to_string(),
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
            publish_timeout: Duration::from_secs(5),
            max_in_flight: 16,
            retry: RetryPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// What one relay cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayCycle {
    pub fetched: usize,
    pub published: usize,
    /// Failed attempts scheduled for retry
    pub failed: usize,
    pub dead_lettered: usize,
    /// Skipped because an earlier entry of the same aggregate failed this cycle
    pub deferred: usize,
}

/// Relay runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub cycles: u64,
    pub published: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub store_errors: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

impl RelayStats {
    fn record(&mut self, cycle: &RelayCycle) {
        self.cycles += 1;
        self.published += cycle.published as u64;
        self.failed += cycle.failed as u64;
        self.dead_lettered += cycle.dead_lettered as u64;
        self.last_cycle_at = Some(Utc::now());
    }
}

/// Handle to control a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<RelayStats>>,
}

impl RelayHandle {
    /// Stop after the current cycle and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }
}

/// Polls an [`OutboxStore`] and publishes due entries through a broker.
pub struct OutboxRelay<S, B> {
    store: S,
    publisher: TimedPublisher<B>,
    config: RelayConfig,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OutboxStore,
    B: BrokerClient + 'static,
{
    pub fn new(store: S, broker: Arc<B>, config: RelayConfig) -> Self {
        let publisher =
            TimedPublisher::new(broker, config.publish_timeout).with_max_in_flight(config.max_in_flight);
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Publish one batch of due entries.
    ///
    /// Broker failures are recorded on the entries; only store failures are
    /// returned, and they end the cycle early.
    pub fn run_once(&self) -> Result<RelayCycle, StoreError> {
        let batch = self.store.fetch_due(Utc::now(), self.config.batch_size)?;
        let mut cycle = RelayCycle {
            fetched: batch.len(),
            ..RelayCycle::default()
        };
        let mut failed_aggregates: HashSet<AggregateId> = HashSet::new();

        for entry in batch {
            if failed_aggregates.contains(&entry.aggregate_id) {
                cycle.deferred += 1;
                continue;
            }

            match self.attempt(&entry) {
                Ok(()) => {
                    self.store.mark_published(entry.id, Utc::now())?;
                    cycle.published += 1;
                    debug!(
                        relay = %self.config.name,
                        entry_id = %entry.id,
                        subject = %entry.subject,
                        attempt = entry.attempts + 1,
                        "entry published"
                    );
                }
                Err(reason) => {
                    failed_aggregates.insert(entry.aggregate_id);
                    let attempts = entry.attempts + 1;
                    let now = Utc::now();
                    let retry_at = self.config.retry.next_attempt_at(attempts, now);
                    self.store.mark_failed(entry.id, &reason, now, retry_at)?;

                    match retry_at {
                        Some(at) => {
                            cycle.failed += 1;
                            warn!(
                                relay = %self.config.name,
                                entry_id = %entry.id,
                                aggregate_id = %entry.aggregate_id,
                                subject = %entry.subject,
                                attempt = attempts,
                                retry_at = %at,
                                error = %reason,
                                "publish failed, will retry"
                            );
                        }
                        None => {
                            cycle.dead_lettered += 1;
                            error!(
                                relay = %self.config.name,
                                entry_id = %entry.id,
                                aggregate_id = %entry.aggregate_id,
                                subject = %entry.subject,
                                attempt = attempts,
                                error = %reason,
                                "publish failed, entry dead-lettered"
                            );
                        }
                    }
                }
            }
        }

        Ok(cycle)
    }

    fn attempt(&self, entry: &OutboxEntry) -> Result<(), String> {
        let payload = entry.payload_bytes().map_err(|e| format!("payload encoding: {e}"))?;
        self.publisher
            .publish(&entry.subject, &payload)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Run the relay loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<RelayHandle>
    where
        S: 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(RelayStats::default()));
        let stats_clone = Arc::clone(&stats);

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || relay_loop(self, shutdown_rx, stats_clone))?;

        Ok(RelayHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn relay_loop<S, B>(relay: OutboxRelay<S, B>, shutdown_rx: mpsc::Receiver<()>, stats: Arc<Mutex<RelayStats>>)
where
    S: OutboxStore,
    B: BrokerClient + 'static,
{
    let name = relay.config.name.clone();
    info!(relay = %name, "outbox relay started");
    let start_time = Instant::now();

    loop {
        let pause = match relay.run_once() {
            Ok(cycle) => {
                if let Ok(mut s) = stats.lock() {
                    s.record(&cycle);
                    s.uptime_secs = start_time.elapsed().as_secs();
                }
                if cycle.fetched > 0 {
                    debug!(
                        relay = %name,
                        fetched = cycle.fetched,
                        published = cycle.published,
                        failed = cycle.failed,
                        dead_lettered = cycle.dead_lettered,
                        deferred = cycle.deferred,
                        "relay cycle"
                    );
                }
                // go again at once after a full, clean batch
                let drained = cycle.fetched < relay.config.batch_size || cycle.published < cycle.fetched;
                if drained {
                    relay.config.poll_interval
                } else {
                    Duration::ZERO
                }
            }
            Err(e) => {
                if let Ok(mut s) = stats.lock() {
                    s.store_errors += 1;
                    s.uptime_secs = start_time.elapsed().as_secs();
                }
                error!(relay = %name, error = %e, "relay cycle aborted");
                relay.config.poll_interval
            }
        };

        match shutdown_rx.recv_timeout(pause) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    info!(relay = %name, "outbox relay stopped");
}
