//! Pipeline tests: transition → unit of work → outbox → relay → broker.
//!
//! Verifies:
//! - A failed commit leaves no trace (row, history, alert, outbox)
//! - Concurrent writers never lose updates
//! - Alerts are raised once per open episode
//! - Delivery is at-least-once with stable event ids, in per-aggregate order
//! - Slow or failing brokers never block or roll back commits

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use supplyline_core::{AggregateId, AlertStatus, EventId, ExpectedVersion};
use supplyline_events::{BrokerError, Deduplicator, InMemoryBroker, OutboxStatus};
use supplyline_inventory::CreateInventory;
use supplyline_shipment::{CreateShipment, ShipmentStatus};

use crate::outbox::{OutboxRelay, RelayConfig, RelayHealth, RetryPolicy};
use crate::repository::{EntityRepository, PipelineConfig, TransitionError};
use crate::services::{InventoryService, ShipmentService};
use crate::store::{InMemoryStore, OutboxStore};

type Repo = EntityRepository<Arc<InMemoryStore>>;

fn setup() -> (Arc<InMemoryStore>, Arc<Repo>, Arc<InMemoryBroker>) {
    let store = Arc::new(InMemoryStore::new());
    let repo = Arc::new(EntityRepository::new(
        Arc::clone(&store),
        PipelineConfig {
            conflict_retries: 1_000,
            ..PipelineConfig::default()
        },
    ));
    (store, repo, Arc::new(InMemoryBroker::new()))
}

fn relay_config(retry: RetryPolicy) -> RelayConfig {
    RelayConfig {
        poll_interval: Duration::from_millis(10),
        publish_timeout: Duration::from_millis(100),
        retry,
        ..RelayConfig::default()
    }
}

/// Retries become due immediately, so tests can drive cycles by hand.
fn immediate_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::fixed(max_attempts, Duration::ZERO)
}

fn new_inventory(repo: &Repo, quantity: i64, min_quantity: i64) -> AggregateId {
    InventoryService::new(repo)
        .create(CreateInventory {
            inventory_id: AggregateId::new(),
            product_id: "sku-42".to_string(),
            location_id: "wh-main".to_string(),
            quantity,
            min_quantity,
            max_quantity: 0,
            occurred_at: Utc::now(),
        })
        .unwrap()
        .state
        .id
}

fn drain(relay: &OutboxRelay<Arc<InMemoryStore>, InMemoryBroker>, max_cycles: usize) {
    for _ in 0..max_cycles {
        match relay.run_once() {
            Ok(cycle) if cycle.fetched == 0 => return,
            _ => {}
        }
    }
}

#[test]
fn failed_commit_leaves_no_partial_state() {
    let (store, repo, _) = setup();
    let id = new_inventory(&repo, 100, 20);
    store.fail_next_commits(1);

    let err = InventoryService::new(&*repo)
        .set_quantity(id, ExpectedVersion::Exact(1), 10, None)
        .unwrap_err();
    assert!(matches!(err, TransitionError::StoreUnavailable(_)));

    let level = repo.load::<supplyline_inventory::InventoryLevel>(id).unwrap().unwrap();
    assert_eq!(level.version, 1);
    assert_eq!(level.state.quantity(), 100);
    assert_eq!(repo.history(id).unwrap().len(), 1);
    assert!(repo.alerts_for(id).unwrap().is_empty());
    assert_eq!(store.outbox_entries().unwrap().len(), 1);

    // the same request succeeds once the store is back
    let outcome = InventoryService::new(&*repo)
        .set_quantity(id, ExpectedVersion::Exact(1), 10, None)
        .unwrap();
    assert_eq!(outcome.state.version, 2);
    assert!(outcome.alert.is_some());
}

#[test]
fn concurrent_any_writers_lose_no_updates() {
    let (store, repo, _) = setup();
    let id = new_inventory(&repo, 0, 0);

    let threads = 8;
    let per_thread = 25;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                let service = InventoryService::new(&*repo);
                for _ in 0..per_thread {
                    service.receive(id, ExpectedVersion::Any, 1, None).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total = (threads * per_thread) as u64;
    let level = repo.load::<supplyline_inventory::InventoryLevel>(id).unwrap().unwrap();
    assert_eq!(level.state.quantity(), total as i64);
    assert_eq!(level.version, 1 + total);

    let versions: Vec<u64> = repo.history(id).unwrap().iter().map(|h| h.version).collect();
    assert_eq!(versions, (1..=1 + total).collect::<Vec<_>>());
    assert_eq!(store.outbox_entries().unwrap().len() as u64, 1 + total);
}

#[test]
fn concurrent_exact_writers_commit_once() {
    let (_, repo, _) = setup();
    let id = new_inventory(&repo, 50, 0);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                InventoryService::new(&*repo).set_quantity(id, ExpectedVersion::Exact(1), 60 + i, None)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let committed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert!(matches!(
            err,
            TransitionError::ConcurrencyConflict { expected: 1, actual: 2, .. }
        ));
    }
    assert_eq!(repo.history(id).unwrap().len(), 2);
}

#[test]
fn low_stock_alert_is_raised_once_per_episode() {
    let (store, repo, _) = setup();
    let service = InventoryService::new(&*repo);
    let id = new_inventory(&repo, 100, 20);

    let first = service.set_quantity(id, ExpectedVersion::Exact(1), 15, None).unwrap();
    let alert = first.alert.expect("low stock alert");
    assert_eq!(first.outbox.event_type, "inventory.alert.low_stock");
    assert_eq!(first.outbox.payload["data"]["alert"]["details"]["current_level"], 15);

    let second = service.set_quantity(id, ExpectedVersion::Exact(2), 10, None).unwrap();
    assert!(second.alert.is_none());
    assert_eq!(second.outbox.event_type, "inventory.stock.changed");
    assert_eq!(repo.alerts_for(id).unwrap().len(), 1);

    repo.acknowledge_alert(alert.id).unwrap();
    let third = service.set_quantity(id, ExpectedVersion::Exact(3), 8, None).unwrap();
    assert!(third.alert.is_none(), "acknowledged alerts are still open");

    repo.resolve_alert(alert.id).unwrap();
    let fourth = service.set_quantity(id, ExpectedVersion::Exact(4), 5, None).unwrap();
    assert!(fourth.alert.is_some(), "a new episode after resolution");

    assert_eq!(repo.alerts_by_status(AlertStatus::Resolved).unwrap().len(), 1);
    assert_eq!(repo.alerts_by_status(AlertStatus::New).unwrap().len(), 1);

    let kinds: Vec<_> = repo.history(id).unwrap().into_iter().map(|h| h.kind).collect();
    assert_eq!(kinds, vec!["created", "adjusted", "adjusted", "adjusted", "adjusted"]);
    assert_eq!(store.outbox_entries().unwrap().len(), 5);
}

#[test]
fn committed_transitions_reach_the_broker_with_stable_ids() {
    let (store, repo, broker) = setup();
    let id = new_inventory(&repo, 100, 20);
    InventoryService::new(&*repo)
        .set_quantity(id, ExpectedVersion::Any, 15, None)
        .unwrap();

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(5)));
    let cycle = relay.run_once().unwrap();
    assert_eq!(cycle.published, 2);

    let entry_ids: Vec<EventId> = store.outbox_entries().unwrap().iter().map(|e| e.id).collect();
    assert_eq!(broker.delivered_event_ids(), entry_ids);

    let deliveries = broker.deliveries();
    assert_eq!(deliveries[1].subject, "supplychain.inventory.alert.low_stock");
    let event = deliveries[1].event().unwrap();
    assert_eq!(event.event_type(), "inventory.alert.low_stock");
    assert_eq!(event.version(), 2);
    assert_eq!(event.source(), "supplyline");
}

#[test]
fn crash_after_ack_republishes_the_same_event() {
    let (store, repo, broker) = setup();
    let id = new_inventory(&repo, 10, 0);
    let entry_id = store.outbox_entries().unwrap()[0].id;

    // broker acks, then the store goes away before the entry is marked
    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(5)));
    store.fail_next_status_updates(1);
    assert!(relay.run_once().is_err());
    assert_eq!(store.get(entry_id).unwrap().unwrap().status, OutboxStatus::Pending);

    // "restart": a fresh relay over the same durable state
    drop(relay);
    let restarted = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(5)));
    assert_eq!(restarted.run_once().unwrap().published, 1);

    assert_eq!(broker.delivered_event_ids(), vec![entry_id, entry_id]);
    let mut dedup = Deduplicator::new();
    let handled = broker
        .delivered_event_ids()
        .into_iter()
        .filter(|id| dedup.first_sighting(*id))
        .count();
    assert_eq!(handled, 1);
    assert_eq!(repo.load::<supplyline_inventory::InventoryLevel>(id).unwrap().unwrap().version, 1);
}

#[test]
fn restart_from_snapshot_keeps_unpublished_entries() {
    let (store, repo, broker) = setup();
    new_inventory(&repo, 10, 0);
    new_inventory(&repo, 20, 0);

    let durable = store.snapshot().unwrap();
    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(5)));
    relay.run_once().unwrap();

    // process dies; whatever was persisted before the cycle is what remains
    let recovered = Arc::new(InMemoryStore::from_snapshot(durable));
    let relay = OutboxRelay::new(Arc::clone(&recovered), Arc::clone(&broker), relay_config(immediate_retry(5)));
    assert_eq!(relay.run_once().unwrap().published, 2);
    assert_eq!(recovered.stats().unwrap().backlog(), 0);

    let mut dedup = Deduplicator::new();
    for id in broker.delivered_event_ids() {
        dedup.first_sighting(id);
    }
    assert_eq!(broker.deliveries().len(), 4);
    assert_eq!(dedup.len(), 2);
}

#[test]
fn per_aggregate_order_survives_broker_failures() {
    let (store, repo, broker) = setup();
    let service = InventoryService::new(&*repo);
    let a = new_inventory(&repo, 100, 0);
    let b = new_inventory(&repo, 100, 0);
    for q in [90, 80, 70] {
        service.set_quantity(a, ExpectedVersion::Any, q, None).unwrap();
        service.set_quantity(b, ExpectedVersion::Any, q, None).unwrap();
    }

    broker.fail_next(BrokerError::Unavailable("connection reset".into()));
    broker.fail_next(BrokerError::Timeout(Duration::from_millis(5)));
    broker.fail_next(BrokerError::Unavailable("connection reset".into()));

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(10)));
    drain(&relay, 20);
    assert_eq!(store.stats().unwrap().backlog(), 0);

    let mut versions: HashMap<AggregateId, Vec<u64>> = HashMap::new();
    for delivery in broker.deliveries() {
        let event = delivery.event().unwrap();
        let aggregate = match event.data().get("inventory_id").and_then(|v| v.as_str()) {
            Some(raw) => raw.parse::<AggregateId>().unwrap(),
            None => continue,
        };
        versions.entry(aggregate).or_default().push(event.version());
    }
    assert_eq!(versions[&a], vec![1, 2, 3, 4]);
    assert_eq!(versions[&b], vec![1, 2, 3, 4]);
}

#[test]
fn slow_broker_times_out_then_delivers() {
    let (store, repo, broker) = setup();
    new_inventory(&repo, 10, 0);
    let entry_id = store.outbox_entries().unwrap()[0].id;

    broker.set_latency(Some(Duration::from_millis(300)));
    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(5)));
    let cycle = relay.run_once().unwrap();
    assert_eq!(cycle.failed, 1);

    let entry = store.get(entry_id).unwrap().unwrap();
    assert_eq!(entry.status, OutboxStatus::Failed);
    assert!(entry.last_error.unwrap().contains("timed out"));

    broker.set_latency(None);
    // wait for the abandoned attempt to land
    let deadline = Instant::now() + Duration::from_secs(5);
    while broker.deliveries().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(relay.run_once().unwrap().published, 1);
    let entry = store.get(entry_id).unwrap().unwrap();
    assert_eq!(entry.status, OutboxStatus::Published);
    assert_eq!(entry.attempts, 2);

    let ids = broker.delivered_event_ids();
    assert_eq!(ids, vec![entry_id, entry_id]);
}

#[test]
fn broker_outage_never_blocks_commits() {
    let (store, repo, broker) = setup();
    let id = new_inventory(&repo, 100, 0);
    for _ in 0..50 {
        broker.fail_next(BrokerError::Unavailable("down".into()));
    }

    let relay = OutboxRelay::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        relay_config(RetryPolicy::fixed(50, Duration::from_secs(60))),
    );
    relay.run_once().unwrap();

    let service = InventoryService::new(&*repo);
    for q in 1..=5 {
        service.set_quantity(id, ExpectedVersion::Any, q, None).unwrap();
    }
    assert_eq!(repo.history(id).unwrap().len(), 6);
    assert_eq!(store.stats().unwrap().backlog(), 6);
    assert!(broker.deliveries().is_empty());
}

#[test]
fn dead_letters_are_reported_and_can_be_requeued() {
    let (store, repo, broker) = setup();
    let service = InventoryService::new(&*repo);
    let id = new_inventory(&repo, 100, 0);
    service.set_quantity(id, ExpectedVersion::Any, 50, None).unwrap();
    let first = store.outbox_entries().unwrap()[0].id;

    broker.fail_next(BrokerError::Rejected("schema mismatch".into()));
    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(1)));

    let cycle = relay.run_once().unwrap();
    assert_eq!(cycle.dead_lettered, 1);
    assert_eq!(cycle.deferred, 1);

    // the dead letter no longer holds back its aggregate
    assert_eq!(relay.run_once().unwrap().published, 1);

    let dead = store.dead_letters(10).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, first);

    let report = RelayHealth::default().check(&*store, Utc::now()).unwrap();
    assert!(report.is_healthy());
    assert_eq!(report.dead_lettered, 1);

    store.requeue(first).unwrap();
    assert_eq!(relay.run_once().unwrap().published, 1);
    assert!(store.dead_letters(10).unwrap().is_empty());
    assert!(store.requeue(first).is_err());
}

#[test]
fn health_tracks_backlog_while_broker_is_down() {
    let (store, repo, broker) = setup();
    for _ in 0..5 {
        new_inventory(&repo, 10, 0);
    }
    let health = RelayHealth {
        max_backlog: 3,
        max_lag: Duration::from_secs(60),
    };
    assert!(!health.check(&*store, Utc::now()).unwrap().is_healthy());

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(5)));
    drain(&relay, 5);

    let report = health.check(&*store, Utc::now()).unwrap();
    assert!(report.is_healthy());
    assert_eq!(report.backlog, 0);
    assert_eq!(report.oldest_pending_age, None);
}

#[test]
fn spawned_relay_delivers_shipment_lifecycle_in_order() {
    let (store, repo, broker) = setup();
    let subscription = broker.subscribe();
    let handle = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), relay_config(immediate_retry(5)))
        .spawn()
        .unwrap();

    let service = ShipmentService::new(&*repo);
    let id = service
        .create(CreateShipment {
            shipment_id: AggregateId::new(),
            order_id: "ORD-77".to_string(),
            origin: "Lyon".to_string(),
            destination: "Milan".to_string(),
            carrier_id: None,
            tracking_number: Some("TRK-1".to_string()),
            notes: None,
            estimated_arrival: Some(Utc::now() - chrono::Duration::hours(2)),
            occurred_at: Utc::now(),
        })
        .unwrap()
        .state
        .id;
    service
        .update_status(id, ExpectedVersion::Exact(1), ShipmentStatus::InTransit, Some("Turin".into()))
        .unwrap();
    service
        .update_status(id, ExpectedVersion::Exact(2), ShipmentStatus::Delivered, None)
        .unwrap();

    let mut event_types = Vec::new();
    for _ in 0..3 {
        let delivery = subscription.recv_timeout(Duration::from_secs(5)).unwrap();
        event_types.push(delivery.event().unwrap().event_type().to_string());
    }
    handle.shutdown();

    // in transit past the ETA raises the delay alert; delivery then reports lateness
    assert_eq!(
        event_types,
        vec!["shipment.created", "shipment.alert.delay", "shipment.alert.late_delivery"]
    );
    assert_eq!(repo.alerts_for(id).unwrap().len(), 2);
}
