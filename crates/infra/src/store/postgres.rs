//! Postgres-backed entity + outbox store.
//!
//! One transaction per [`UnitOfWork`]: the aggregate row is updated with a
//! compare-and-swap on its version, and the history, alert, and outbox rows
//! are inserted in the same transaction.
//!
//! ## Tables
//!
//! ```sql
//! CREATE TABLE aggregates (
//!     id             UUID PRIMARY KEY,
//!     aggregate_type TEXT        NOT NULL,
//!     version        BIGINT      NOT NULL CHECK (version > 0),
//!     state          JSONB       NOT NULL,
//!     created_at     TIMESTAMPTZ NOT NULL,
//!     updated_at     TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE history (
//!     id             UUID PRIMARY KEY,
//!     aggregate_id   UUID        NOT NULL REFERENCES aggregates (id),
//!     aggregate_type TEXT        NOT NULL,
//!     version        BIGINT      NOT NULL,
//!     kind           TEXT        NOT NULL,
//!     delta          BIGINT,
//!     value          JSONB,
//!     note           TEXT,
//!     occurred_at    TIMESTAMPTZ NOT NULL,
//!     recorded_at    TIMESTAMPTZ NOT NULL,
//!     UNIQUE (aggregate_id, version)
//! );
//!
//! CREATE TABLE alerts (
//!     id             UUID PRIMARY KEY,
//!     aggregate_id   UUID        NOT NULL REFERENCES aggregates (id),
//!     aggregate_type TEXT        NOT NULL,
//!     alert_type     TEXT        NOT NULL,
//!     message        TEXT        NOT NULL,
//!     status         TEXT        NOT NULL,
//!     created_at     TIMESTAMPTZ NOT NULL,
//!     updated_at     TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX alerts_status_idx ON alerts (status);
//!
//! CREATE TABLE outbox (
//!     seq               BIGSERIAL,
//!     id                UUID PRIMARY KEY,
//!     aggregate_id      UUID        NOT NULL,
//!     aggregate_type    TEXT        NOT NULL,
//!     aggregate_version BIGINT      NOT NULL,
//!     subject           TEXT        NOT NULL,
//!     event_type        TEXT        NOT NULL,
//!     payload           JSONB       NOT NULL,
//!     status            TEXT        NOT NULL,
//!     attempts          INTEGER     NOT NULL DEFAULT 0,
//!     created_at        TIMESTAMPTZ NOT NULL,
//!     last_attempt_at   TIMESTAMPTZ,
//!     next_attempt_at   TIMESTAMPTZ,
//!     published_at      TIMESTAMPTZ,
//!     last_error        TEXT
//! );
//! CREATE INDEX outbox_status_seq_idx ON outbox (status, seq);
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` / `Duplicate` |
//! | Database (other) | any | `Unavailable` |
//! | PoolClosed, Io, Tls, timeouts | N/A | `Unavailable` |
//! | ColumnDecode, Decode | N/A | `Serialization` |
//!
//! ## Runtime
//!
//! The store traits are synchronous. The tokio runtime handle is captured at
//! construction and used to `block_on` the async queries, so trait methods
//! must be called from threads outside the runtime's async workers (the relay
//! thread, `spawn_blocking`).

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Span, instrument};

use supplyline_core::{AggregateId, AlertId, AlertRecord, AlertStatus, EventId, HistoryId, HistoryRecord};
use supplyline_events::{OutboxEntry, OutboxStatus};

use super::r#trait::{AggregateRow, EntityStore, OutboxStats, OutboxStore, StoreError, UnitOfWork};

const OUTBOX_COLUMNS: &str = "id, aggregate_id, aggregate_type, aggregate_version, subject, event_type, \
     payload, status, attempts, created_at, last_attempt_at, next_attempt_at, published_at, last_error";

const ALERT_COLUMNS: &str =
    "id, aggregate_id, aggregate_type, alert_type, message, status, created_at, updated_at";

/// Postgres-backed store implementing both [`EntityStore`] and [`OutboxStore`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresStore {
    /// Must be called from within a tokio runtime.
    pub fn new(pool: PgPool) -> Result<Self, StoreError> {
        let handle = Handle::try_current().map_err(|_| {
            StoreError::Unavailable("PostgresStore must be created inside a tokio runtime".to_string())
        })?;
        Ok(Self { pool, handle })
    }

    pub fn with_handle(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self), fields(aggregate_id = %id), err)]
    pub async fn load_row(&self, id: AggregateId) -> Result<Option<AggregateRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_type, version, state, created_at, updated_at
            FROM aggregates
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_row", e))?;

        row.as_ref().map(aggregate_from_row).transpose()
    }

    /// Commit a unit of work in one transaction.
    #[instrument(
        skip(self, unit),
        fields(
            aggregate_id = %unit.row.id,
            expected_version = ?unit.expected_version,
            entry_id = %unit.outbox.id
        ),
        err
    )]
    pub async fn commit_unit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        let id = unit.row.id;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match unit.expected_version {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO aggregates (id, aggregate_type, version, state, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(id.as_uuid())
                .bind(&unit.row.aggregate_type)
                .bind(unit.row.version as i64)
                .bind(&unit.row.state)
                .bind(unit.row.created_at)
                .bind(unit.row.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::Duplicate(id)
                    } else {
                        map_sqlx_error("insert_aggregate", e)
                    }
                })?;
            }
            Some(expected) => {
                let updated = sqlx::query(
                    r#"
                    UPDATE aggregates
                    SET version = $2, state = $3, updated_at = $4
                    WHERE id = $1 AND version = $5
                    "#,
                )
                .bind(id.as_uuid())
                .bind(unit.row.version as i64)
                .bind(&unit.row.state)
                .bind(unit.row.updated_at)
                .bind(expected as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_aggregate", e))?;

                if updated.rows_affected() == 0 {
                    let actual = current_version(&mut tx, id).await?;
                    rollback(tx).await?;
                    return match actual {
                        Some(actual) => Err(StoreError::Conflict {
                            aggregate_id: id,
                            expected,
                            actual,
                        }),
                        None => Err(StoreError::NotFound(format!("aggregate {id}"))),
                    };
                }
            }
        }

        let h = &unit.history;
        sqlx::query(
            r#"
            INSERT INTO history (id, aggregate_id, aggregate_type, version, kind, delta, value, note, occurred_at, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(h.id.as_uuid())
        .bind(id.as_uuid())
        .bind(&h.aggregate_type)
        .bind(h.version as i64)
        .bind(&h.kind)
        .bind(h.delta)
        .bind(&h.value)
        .bind(&h.note)
        .bind(h.occurred_at)
        .bind(h.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict {
                    aggregate_id: id,
                    expected: unit.expected_version.unwrap_or(0),
                    actual: h.version,
                }
            } else {
                map_sqlx_error("insert_history", e)
            }
        })?;

        if let Some(alert) = &unit.alert {
            sqlx::query(
                r#"
                INSERT INTO alerts (id, aggregate_id, aggregate_type, alert_type, message, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(alert.id.as_uuid())
            .bind(id.as_uuid())
            .bind(&alert.aggregate_type)
            .bind(&alert.alert_type)
            .bind(&alert.message)
            .bind(alert.status.as_str())
            .bind(alert.created_at)
            .bind(alert.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_alert", e))?;
        }

        let o = &unit.outbox;
        sqlx::query(
            r#"
            INSERT INTO outbox (id, aggregate_id, aggregate_type, aggregate_version, subject, event_type,
                                payload, status, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(o.id.as_uuid())
        .bind(id.as_uuid())
        .bind(&o.aggregate_type)
        .bind(o.aggregate_version as i64)
        .bind(&o.subject)
        .bind(&o.event_type)
        .bind(&o.payload)
        .bind(o.status.as_str())
        .bind(o.attempts as i32)
        .bind(o.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_outbox", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(aggregate_id = %id), err)]
    pub async fn load_history(&self, id: AggregateId) -> Result<Vec<HistoryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, aggregate_type, version, kind, delta, value, note, occurred_at, recorded_at
            FROM history
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_history", e))?;

        rows.iter().map(history_from_row).collect()
    }

    #[instrument(skip(self), fields(aggregate_id = %id), err)]
    pub async fn load_alerts(&self, id: AggregateId, open_only: bool) -> Result<Vec<AlertRecord>, StoreError> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE aggregate_id = $1 AND ($2 = FALSE OR status <> 'resolved') \
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(open_only)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_alerts", e))?;

        rows.iter().map(alert_from_row).collect()
    }

    #[instrument(skip(self), fields(status = %status), err)]
    pub async fn load_alerts_by_status(&self, status: AlertStatus) -> Result<Vec<AlertRecord>, StoreError> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE status = $1 ORDER BY created_at ASC");
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_alerts_by_status", e))?;

        rows.iter().map(alert_from_row).collect()
    }

    #[instrument(skip(self), fields(alert_id = %id, to = %to), err)]
    pub async fn advance_alert(
        &self,
        id: AlertId,
        to: AlertStatus,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("select_alert", e))?
            .ok_or_else(|| StoreError::NotFound(format!("alert {id}")))?;

        let mut alert = alert_from_row(&row)?;
        if let Err(e) = alert.advance(to, at) {
            rollback(tx).await?;
            return Err(StoreError::InvalidTransition(e.to_string()));
        }

        sqlx::query("UPDATE alerts SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(alert.status.as_str())
            .bind(alert.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_alert", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(alert)
    }

    /// Due entries, oldest first, skipping aggregates held back by an older
    /// entry that is still backing off.
    #[instrument(skip(self), fields(fetched = tracing::field::Empty), err)]
    pub async fn load_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let span = Span::current();

        let sql = format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox o
            WHERE o.status IN ('pending', 'failed')
              AND (o.next_attempt_at IS NULL OR o.next_attempt_at <= $1)
              AND NOT EXISTS (
                  SELECT 1 FROM outbox b
                  WHERE b.aggregate_id = o.aggregate_id
                    AND b.status IN ('pending', 'failed')
                    AND b.seq < o.seq
                    AND b.next_attempt_at > $1
              )
            ORDER BY o.seq ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_due", e))?;

        span.record("fetched", rows.len());
        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn load_entry(&self, id: EventId) -> Result<Option<OutboxEntry>, StoreError> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_entry", e))?;

        row.as_ref().map(outbox_from_row).transpose()
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn set_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'published', attempts = attempts + 1, last_attempt_at = $2,
                published_at = $2, next_attempt_at = NULL, last_error = NULL
            WHERE id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_published", e))?;

        if updated.rows_affected() == 0 && self.load_entry(id).await?.is_none() {
            return Err(StoreError::NotFound(format!("outbox entry {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, error), fields(entry_id = %id, dead_letter = retry_at.is_none()), err)]
    pub async fn set_failed(
        &self,
        id: EventId,
        error: &str,
        at: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let status = if retry_at.is_some() {
            OutboxStatus::Failed
        } else {
            OutboxStatus::DeadLettered
        };

        let updated = sqlx::query(
            r#"
            UPDATE outbox
            SET status = $2, attempts = attempts + 1, last_attempt_at = $3,
                next_attempt_at = $4, last_error = $5
            WHERE id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(at)
        .bind(retry_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_failed", e))?;

        if updated.rows_affected() == 0 && self.load_entry(id).await?.is_none() {
            return Err(StoreError::NotFound(format!("outbox entry {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn load_stats(&self) -> Result<OutboxStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending')       AS pending,
                COUNT(*) FILTER (WHERE status = 'failed')        AS failed,
                COUNT(*) FILTER (WHERE status = 'published')     AS published,
                COUNT(*) FILTER (WHERE status = 'dead_lettered') AS dead_lettered,
                MIN(created_at) FILTER (WHERE status IN ('pending', 'failed')) AS oldest_undelivered_at
            FROM outbox
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stats", e))?;

        let count = |name: &str| -> Result<u64, StoreError> {
            let n: i64 = row.try_get(name).map_err(decode_error)?;
            Ok(n.max(0) as u64)
        };

        Ok(OutboxStats {
            pending: count("pending")?,
            failed: count("failed")?,
            published: count("published")?,
            dead_lettered: count("dead_lettered")?,
            oldest_undelivered_at: row.try_get("oldest_undelivered_at").map_err(decode_error)?,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn load_dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE status = 'dead_lettered' ORDER BY seq ASC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_dead_letters", e))?;

        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn requeue_entry(&self, id: EventId) -> Result<OutboxEntry, StoreError> {
        let sql = format!(
            "UPDATE outbox SET status = 'pending', attempts = 0, next_attempt_at = NULL \
             WHERE id = $1 AND status = 'dead_lettered' \
             RETURNING {OUTBOX_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("requeue_entry", e))?;

        match row {
            Some(row) => outbox_from_row(&row),
            None => match self.load_entry(id).await? {
                Some(entry) => Err(StoreError::InvalidTransition(format!(
                    "outbox entry {id} is {}, only dead_lettered entries can be requeued",
                    entry.status
                ))),
                None => Err(StoreError::NotFound(format!("outbox entry {id}"))),
            },
        }
    }
}

async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    id: AggregateId,
) -> Result<Option<u64>, StoreError> {
    let row = sqlx::query("SELECT version FROM aggregates WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("current_version", e))?;

    match row {
        Some(row) => {
            let v: i64 = row.try_get("version").map_err(decode_error)?;
            Ok(Some(v as u64))
        }
        None => Ok(None),
    }
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        other => StoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}

fn aggregate_from_row(row: &PgRow) -> Result<AggregateRow, StoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    Ok(AggregateRow {
        id: AggregateId::from_uuid(id),
        aggregate_type: row.try_get("aggregate_type").map_err(decode_error)?,
        version: version as u64,
        state: row.try_get("state").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn history_from_row(row: &PgRow) -> Result<HistoryRecord, StoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(decode_error)?;
    let aggregate_id: uuid::Uuid = row.try_get("aggregate_id").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    Ok(HistoryRecord {
        id: HistoryId::from_uuid(id),
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row.try_get("aggregate_type").map_err(decode_error)?,
        version: version as u64,
        kind: row.try_get("kind").map_err(decode_error)?,
        delta: row.try_get("delta").map_err(decode_error)?,
        value: row.try_get("value").map_err(decode_error)?,
        note: row.try_get("note").map_err(decode_error)?,
        occurred_at: row.try_get("occurred_at").map_err(decode_error)?,
        recorded_at: row.try_get("recorded_at").map_err(decode_error)?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<AlertRecord, StoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(decode_error)?;
    let aggregate_id: uuid::Uuid = row.try_get("aggregate_id").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    Ok(AlertRecord {
        id: AlertId::from_uuid(id),
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row.try_get("aggregate_type").map_err(decode_error)?,
        alert_type: row.try_get("alert_type").map_err(decode_error)?,
        message: row.try_get("message").map_err(decode_error)?,
        status: status
            .parse()
            .map_err(|e: supplyline_core::DomainError| StoreError::Serialization(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(decode_error)?;
    let aggregate_id: uuid::Uuid = row.try_get("aggregate_id").map_err(decode_error)?;
    let aggregate_version: i64 = row.try_get("aggregate_version").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let attempts: i32 = row.try_get("attempts").map_err(decode_error)?;
    Ok(OutboxEntry {
        id: EventId::from_uuid(id),
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row.try_get("aggregate_type").map_err(decode_error)?,
        aggregate_version: aggregate_version as u64,
        subject: row.try_get("subject").map_err(decode_error)?,
        event_type: row.try_get("event_type").map_err(decode_error)?,
        payload: row.try_get("payload").map_err(decode_error)?,
        status: status
            .parse()
            .map_err(|e: supplyline_core::DomainError| StoreError::Serialization(e.to_string()))?,
        attempts: attempts.max(0) as u32,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        last_attempt_at: row.try_get("last_attempt_at").map_err(decode_error)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(decode_error)?,
        published_at: row.try_get("published_at").map_err(decode_error)?,
        last_error: row.try_get("last_error").map_err(decode_error)?,
    })
}

// Sync trait implementations

impl EntityStore for PostgresStore {
    fn load(&self, id: AggregateId) -> Result<Option<AggregateRow>, StoreError> {
        self.handle.block_on(self.load_row(id))
    }

    fn open_alerts(&self, id: AggregateId) -> Result<Vec<AlertRecord>, StoreError> {
        self.handle.block_on(self.load_alerts(id, true))
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        self.handle.block_on(self.commit_unit(unit))
    }

    fn history(&self, id: AggregateId) -> Result<Vec<HistoryRecord>, StoreError> {
        self.handle.block_on(self.load_history(id))
    }

    fn alerts_for(&self, id: AggregateId) -> Result<Vec<AlertRecord>, StoreError> {
        self.handle.block_on(self.load_alerts(id, false))
    }

    fn alerts_by_status(&self, status: AlertStatus) -> Result<Vec<AlertRecord>, StoreError> {
        self.handle.block_on(self.load_alerts_by_status(status))
    }

    fn update_alert_status(
        &self,
        id: AlertId,
        to: AlertStatus,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        self.handle.block_on(self.advance_alert(id, to, at))
    }
}

impl OutboxStore for PostgresStore {
    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.handle.block_on(self.load_due(now, limit))
    }

    fn get(&self, id: EventId) -> Result<Option<OutboxEntry>, StoreError> {
        self.handle.block_on(self.load_entry(id))
    }

    fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.handle.block_on(self.set_published(id, at))
    }

    fn mark_failed(
        &self,
        id: EventId,
        error: &str,
        at: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.handle.block_on(self.set_failed(id, error, at, retry_at))
    }

    fn stats(&self) -> Result<OutboxStats, StoreError> {
        self.handle.block_on(self.load_stats())
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.handle.block_on(self.load_dead_letters(limit))
    }

    fn requeue(&self, id: EventId) -> Result<OutboxEntry, StoreError> {
        self.handle.block_on(self.requeue_entry(id))
    }
}
