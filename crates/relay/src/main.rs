//! Outbox relay process: Postgres outbox → Redis Streams.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info, warn};

use supplyline_infra::broker::RedisStreamsBroker;
use supplyline_infra::config::AppConfig;
use supplyline_infra::outbox::{OutboxRelay, RelayHealth};
use supplyline_infra::store::PostgresStore;

const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    supplyline_observability::init_with(&config.logging);

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let pool = PgPool::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PostgresStore::new(pool)?);

    let broker = RedisStreamsBroker::new(&config.redis_url)?.with_timeout(config.relay.publish_timeout);

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::new(broker), config.relay.clone())
        .spawn()
        .context("failed to start outbox relay")?;
    info!(
        relay = %config.relay.name,
        batch_size = config.relay.batch_size,
        publish_timeout_ms = config.relay.publish_timeout.as_millis() as u64,
        max_attempts = config.relay.retry.max_attempts,
        "relay running"
    );

    let (stop_health, health) = spawn_health_reporter(Arc::clone(&store), config.health)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    let _ = stop_health.send(());
    let stats = tokio::task::spawn_blocking(move || {
        let stats = relay.stats();
        relay.shutdown();
        let _ = health.join();
        stats
    })
    .await
    .context("relay shutdown panicked")?;

    info!(
        cycles = stats.cycles,
        published = stats.published,
        failed = stats.failed,
        dead_lettered = stats.dead_lettered,
        store_errors = stats.store_errors,
        "relay stopped"
    );

    Ok(())
}

/// Logs a health report every `HEALTH_INTERVAL` on its own thread.
///
/// The Postgres store blocks on the runtime handle, so it must not be called
/// from async tasks.
fn spawn_health_reporter(
    store: Arc<PostgresStore>,
    health: RelayHealth,
) -> std::io::Result<(mpsc::Sender<()>, thread::JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel::<()>();
    let join = thread::Builder::new()
        .name("relay-health".to_string())
        .spawn(move || {
            loop {
                match health.check(&*store, Utc::now()) {
                    Ok(report) if report.is_healthy() => info!(
                        backlog = report.backlog,
                        dead_lettered = report.dead_lettered,
                        oldest_pending_secs = report.oldest_pending_age.map(|d| d.as_secs()),
                        "relay healthy"
                    ),
                    Ok(report) => warn!(
                        backlog = report.backlog,
                        dead_lettered = report.dead_lettered,
                        oldest_pending_secs = report.oldest_pending_age.map(|d| d.as_secs()),
                        max_backlog = health.max_backlog,
                        max_lag_secs = health.max_lag.as_secs(),
                        "relay unhealthy"
                    ),
                    Err(e) => error!(error = %e, "health check failed"),
                }

                match rx.recv_timeout(HEALTH_INTERVAL) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
        })?;
    Ok((tx, join))
}
