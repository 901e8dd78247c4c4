use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

use supplyline_core::{AggregateId, AlertId, AlertRecord, AlertStatus, EventId, HistoryRecord};
use supplyline_events::{OutboxEntry, OutboxStatus};

use super::r#trait::{AggregateRow, EntityStore, OutboxStats, OutboxStore, StoreError, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Tables {
    aggregates: HashMap<AggregateId, AggregateRow>,
    history: Vec<HistoryRecord>,
    alerts: Vec<AlertRecord>,
    /// Append order is creation order.
    outbox: Vec<OutboxEntry>,
}

#[derive(Debug, Default)]
struct Faults {
    commits: u32,
    status_updates: u32,
}

/// Point-in-time copy of every table, for crash/restart simulation.
#[derive(Debug, Clone)]
pub struct StoreSnapshot(Tables);

/// In-memory entity + outbox store.
///
/// Intended for tests/dev. A single lock guards all four tables, which makes
/// every [`UnitOfWork`] commit atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    faults: Mutex<Faults>,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding exactly what `snapshot` captured ("restart from disk").
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            tables: RwLock::new(snapshot.0),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(StoreSnapshot(tables.clone()))
    }

    pub fn restore(&self, snapshot: StoreSnapshot) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        *tables = snapshot.0;
        Ok(())
    }

    /// The next `n` commits fail with `Unavailable` before writing anything.
    pub fn fail_next_commits(&self, n: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.commits = n;
        }
    }

    /// The next `n` outbox status updates (`mark_published` / `mark_failed`)
    /// fail with `Unavailable`.
    pub fn fail_next_status_updates(&self, n: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.status_updates = n;
        }
    }

    /// All outbox entries in creation order.
    pub fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.outbox.clone())
    }

    pub fn aggregate_count(&self) -> Result<usize, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.aggregates.len())
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut u32) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().map_err(|_| poisoned())?;
        let remaining = pick(&mut faults);
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StoreError::Unavailable("injected fault".to_string()));
        }
        Ok(())
    }

    fn update_entry(
        &self,
        id: EventId,
        f: impl FnOnce(&mut OutboxEntry) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.take_fault(|faults| &mut faults.status_updates)?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let entry = tables
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox entry {id}")))?;
        f(entry)
    }
}

impl EntityStore for InMemoryStore {
    fn load(&self, id: AggregateId) -> Result<Option<AggregateRow>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.aggregates.get(&id).cloned())
    }

    fn open_alerts(&self, id: AggregateId) -> Result<Vec<AlertRecord>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.aggregate_id == id && a.is_open())
            .cloned()
            .collect())
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        self.take_fault(|faults| &mut faults.commits)?;

        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let id = unit.row.id;

        match (unit.expected_version, tables.aggregates.get(&id)) {
            (None, Some(_)) => return Err(StoreError::Duplicate(id)),
            (None, None) => {}
            (Some(_), None) => return Err(StoreError::NotFound(format!("aggregate {id}"))),
            (Some(expected), Some(current)) if current.version != expected => {
                return Err(StoreError::Conflict {
                    aggregate_id: id,
                    expected,
                    actual: current.version,
                });
            }
            (Some(_), Some(_)) => {}
        }

        // Unique (aggregate_id, version) on history.
        if tables
            .history
            .iter()
            .any(|h| h.aggregate_id == id && h.version == unit.history.version)
        {
            return Err(StoreError::Conflict {
                aggregate_id: id,
                expected: unit.expected_version.unwrap_or(0),
                actual: unit.history.version,
            });
        }

        tables.aggregates.insert(id, unit.row);
        tables.history.push(unit.history);
        if let Some(alert) = unit.alert {
            tables.alerts.push(alert);
        }
        tables.outbox.push(unit.outbox);
        Ok(())
    }

    fn history(&self, id: AggregateId) -> Result<Vec<HistoryRecord>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut records: Vec<_> = tables
            .history
            .iter()
            .filter(|h| h.aggregate_id == id)
            .cloned()
            .collect();
        records.sort_by_key(|h| h.version);
        Ok(records)
    }

    fn alerts_for(&self, id: AggregateId) -> Result<Vec<AlertRecord>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.aggregate_id == id)
            .cloned()
            .collect())
    }

    fn alerts_by_status(&self, status: AlertStatus) -> Result<Vec<AlertRecord>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    fn update_alert_status(
        &self,
        id: AlertId,
        to: AlertStatus,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let alert = tables
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("alert {id}")))?;
        alert
            .advance(to, at)
            .map_err(|e| StoreError::InvalidTransition(e.to_string()))?;
        Ok(alert.clone())
    }
}

impl OutboxStore for InMemoryStore {
    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;

        let mut blocked: HashSet<AggregateId> = HashSet::new();
        let mut batch = Vec::new();

        for entry in tables.outbox.iter().filter(|e| e.status.is_undelivered()) {
            if batch.len() >= limit {
                break;
            }
            if blocked.contains(&entry.aggregate_id) {
                continue;
            }
            if !entry.is_due(now) {
                blocked.insert(entry.aggregate_id);
                continue;
            }
            batch.push(entry.clone());
        }

        Ok(batch)
    }

    fn get(&self, id: EventId) -> Result<Option<OutboxEntry>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.outbox.iter().find(|e| e.id == id).cloned())
    }

    fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update_entry(id, |entry| {
            if entry.status.is_undelivered() {
                entry.mark_published(at);
            }
            Ok(())
        })
    }

    fn mark_failed(
        &self,
        id: EventId,
        error: &str,
        at: DateTime<Utc>,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.update_entry(id, |entry| {
            if entry.status.is_undelivered() {
                entry.mark_failed(error, at, retry_at);
            }
            Ok(())
        })
    }

    fn stats(&self) -> Result<OutboxStats, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut stats = OutboxStats::default();

        for entry in &tables.outbox {
            match entry.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::Failed => stats.failed += 1,
                OutboxStatus::Published => stats.published += 1,
                OutboxStatus::DeadLettered => stats.dead_lettered += 1,
            }
            if entry.status.is_undelivered() {
                stats.oldest_undelivered_at = Some(match stats.oldest_undelivered_at {
                    Some(oldest) => oldest.min(entry.created_at),
                    None => entry.created_at,
                });
            }
        }

        Ok(stats)
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::DeadLettered)
            .take(limit)
            .cloned()
            .collect())
    }

    fn requeue(&self, id: EventId) -> Result<OutboxEntry, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let entry = tables
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox entry {id}")))?;

        if entry.status != OutboxStatus::DeadLettered {
            return Err(StoreError::InvalidTransition(format!(
                "outbox entry {id} is {}, only dead_lettered entries can be requeued",
                entry.status
            )));
        }
        entry.requeue();
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use supplyline_core::{AlertDraft, HistoryEntry};
    use supplyline_events::IntegrationEvent;

    use super::*;

    fn unit(id: AggregateId, expected: Option<u64>, at: DateTime<Utc>) -> UnitOfWork {
        let version = expected.unwrap_or(0) + 1;
        let event = IntegrationEvent::new(EventId::new(), "inventory.stock.changed", at, version, "test", json!({}));
        UnitOfWork {
            row: AggregateRow {
                id,
                aggregate_type: "inventory".to_string(),
                version,
                state: json!({ "quantity": version }),
                created_at: at,
                updated_at: at,
            },
            expected_version: expected,
            history: HistoryRecord::from_entry(HistoryEntry::delta("adjusted", 1), id, "inventory", version, at),
            alert: None,
            outbox: OutboxEntry::pending(&event, id, "inventory", "sc.inventory.stock.changed").unwrap(),
        }
    }

    #[test]
    fn commit_writes_all_parts() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        let mut u = unit(id, None, Utc::now());
        let draft = AlertDraft::new("low_stock", "inventory.alert.low_stock", "low");
        u.alert = Some(AlertRecord::raise(&draft, id, "inventory", Utc::now()));

        store.commit(u).unwrap();

        assert_eq!(store.load(id).unwrap().unwrap().version, 1);
        assert_eq!(store.history(id).unwrap().len(), 1);
        assert_eq!(store.open_alerts(id).unwrap().len(), 1);
        assert_eq!(store.outbox_entries().unwrap().len(), 1);
    }

    #[test]
    fn stale_version_is_a_conflict_and_writes_nothing() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        let now = Utc::now();
        store.commit(unit(id, None, now)).unwrap();
        store.commit(unit(id, Some(1), now)).unwrap();

        let err = store.commit(unit(id, Some(1), now)).unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                aggregate_id: id,
                expected: 1,
                actual: 2
            }
        );
        assert_eq!(store.history(id).unwrap().len(), 2);
        assert_eq!(store.outbox_entries().unwrap().len(), 2);
    }

    #[test]
    fn creating_twice_is_a_duplicate() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store.commit(unit(id, None, Utc::now())).unwrap();
        assert_eq!(store.commit(unit(id, None, Utc::now())), Err(StoreError::Duplicate(id)));
    }

    #[test]
    fn injected_commit_fault_leaves_store_untouched() {
        let store = InMemoryStore::new();
        store.fail_next_commits(1);
        let id = AggregateId::new();

        assert!(matches!(store.commit(unit(id, None, Utc::now())), Err(StoreError::Unavailable(_))));
        assert!(store.load(id).unwrap().is_none());
        assert!(store.outbox_entries().unwrap().is_empty());

        store.commit(unit(id, None, Utc::now())).unwrap();
    }

    #[test]
    fn backing_off_entry_holds_back_its_aggregate_only() {
        let store = InMemoryStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        let now = Utc::now();

        store.commit(unit(a, None, now)).unwrap();
        store.commit(unit(a, Some(1), now)).unwrap();
        store.commit(unit(b, None, now)).unwrap();

        let first_a = store.outbox_entries().unwrap()[0].id;
        store
            .mark_failed(first_a, "down", now, Some(now + Duration::seconds(30)))
            .unwrap();

        let due = store.fetch_due(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].aggregate_id, b);

        let later = store.fetch_due(now + Duration::seconds(30), 10).unwrap();
        assert_eq!(later.len(), 3);
        assert_eq!(later[0].id, first_a);
    }

    #[test]
    fn dead_letters_do_not_block_and_can_be_requeued() {
        let store = InMemoryStore::new();
        let a = AggregateId::new();
        let now = Utc::now();
        store.commit(unit(a, None, now)).unwrap();
        store.commit(unit(a, Some(1), now)).unwrap();

        let first = store.outbox_entries().unwrap()[0].id;
        store.mark_failed(first, "rejected", now, None).unwrap();

        let due = store.fetch_due(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_ne!(due[0].id, first);

        let stats = store.stats().unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.backlog(), 1);

        let requeued = store.requeue(first).unwrap();
        assert_eq!(requeued.status, OutboxStatus::Pending);
        assert!(matches!(store.requeue(first), Err(StoreError::InvalidTransition(_))));
    }

    #[test]
    fn late_publish_ack_does_not_revive_a_dead_letter() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        let now = Utc::now();
        store.commit(unit(id, None, now)).unwrap();

        let entry = store.outbox_entries().unwrap()[0].id;
        store.mark_failed(entry, "timed out", now, None).unwrap();
        store.mark_published(entry, now).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.published, 0);
        assert_eq!(store.outbox_entries().unwrap()[0].status, OutboxStatus::DeadLettered);
    }

    #[test]
    fn snapshot_restores_previous_tables() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        store.commit(unit(id, None, Utc::now())).unwrap();
        let snap = store.snapshot().unwrap();

        store.commit(unit(id, Some(1), Utc::now())).unwrap();
        store.restore(snap.clone()).unwrap();
        assert_eq!(store.load(id).unwrap().unwrap().version, 1);

        let restarted = InMemoryStore::from_snapshot(snap);
        assert_eq!(restarted.outbox_entries().unwrap().len(), 1);
    }

    #[test]
    fn alert_status_moves_forward_only() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        let mut u = unit(id, None, Utc::now());
        let draft = AlertDraft::new("low_stock", "inventory.alert.low_stock", "low");
        let alert = AlertRecord::raise(&draft, id, "inventory", Utc::now());
        let alert_id = alert.id;
        u.alert = Some(alert);
        store.commit(u).unwrap();

        store.update_alert_status(alert_id, AlertStatus::Resolved, Utc::now()).unwrap();
        assert!(store.open_alerts(id).unwrap().is_empty());
        assert!(matches!(
            store.update_alert_status(alert_id, AlertStatus::Acknowledged, Utc::now()),
            Err(StoreError::InvalidTransition(_))
        ));
    }
}
