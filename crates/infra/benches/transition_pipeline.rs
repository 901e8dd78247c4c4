use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use supplyline_core::{AggregateId, ExpectedVersion};
use supplyline_events::InMemoryBroker;
use supplyline_infra::outbox::{OutboxRelay, RelayConfig, RetryPolicy};
use supplyline_infra::services::InventoryService;
use supplyline_infra::store::InMemoryStore;
use supplyline_infra::{EntityRepository, PipelineConfig};
use supplyline_inventory::CreateInventory;

fn create_cmd(quantity: i64) -> CreateInventory {
    CreateInventory {
        inventory_id: AggregateId::new(),
        product_id: "sku-bench".to_string(),
        location_id: "wh-bench".to_string(),
        quantity,
        min_quantity: 10,
        max_quantity: 0,
        occurred_at: Utc::now(),
    }
}

fn bench_transition_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("transition_latency");
    group.sample_size(500);

    group.bench_function("create", |b| {
        let repo = EntityRepository::new(InMemoryStore::new(), PipelineConfig::default());
        let service = InventoryService::new(&repo);
        b.iter(|| {
            black_box(service.create(create_cmd(100)).unwrap());
        });
    });

    group.bench_function("set_quantity_exact_version", |b| {
        let repo = EntityRepository::new(InMemoryStore::new(), PipelineConfig::default());
        let service = InventoryService::new(&repo);
        let id = service.create(create_cmd(1_000)).unwrap().state.id;
        let mut version = 1;
        let mut quantity = 1_000;
        b.iter(|| {
            quantity = if quantity > 500 { quantity - 1 } else { 1_000 };
            let outcome = service
                .set_quantity(id, ExpectedVersion::Exact(version), quantity, None)
                .unwrap();
            version = outcome.state.version;
            black_box(outcome);
        });
    });

    group.bench_function("set_quantity_raising_alert", |b| {
        let repo = EntityRepository::new(InMemoryStore::new(), PipelineConfig::default());
        let service = InventoryService::new(&repo);
        b.iter(|| {
            let id = service.create(create_cmd(100)).unwrap().state.id;
            black_box(service.set_quantity(id, ExpectedVersion::Exact(1), 5, None).unwrap());
        });
    });

    group.finish();
}

fn bench_relay_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay_drain");

    for backlog in [10usize, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*backlog as u64));
        group.bench_with_input(BenchmarkId::from_parameter(backlog), backlog, |b, &backlog| {
            b.iter_with_setup(
                || {
                    let store = Arc::new(InMemoryStore::new());
                    let repo = EntityRepository::new(Arc::clone(&store), PipelineConfig::default());
                    let service = InventoryService::new(&repo);
                    for _ in 0..backlog {
                        service.create(create_cmd(100)).unwrap();
                    }
                    let config = RelayConfig {
                        batch_size: backlog,
                        publish_timeout: Duration::from_secs(5),
                        retry: RetryPolicy::fixed(3, Duration::ZERO),
                        ..RelayConfig::default()
                    };
                    OutboxRelay::new(store, Arc::new(InMemoryBroker::new()), config)
                },
                |relay| {
                    let cycle = relay.run_once().unwrap();
                    assert_eq!(cycle.published, backlog);
                    black_box(cycle);
                },
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transition_latency, bench_relay_drain);
criterion_main!(benches);
