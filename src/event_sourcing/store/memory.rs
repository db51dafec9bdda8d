use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::event_sourcing::core::StorageError;
use super::persistence::{
    AppendBatch, AppendOutcome, EventLog, SnapshotStorage, StoredEvent, StoredSnapshot,
};

// ============================================================================
// In-Memory Backend
// ============================================================================
//
// Event and snapshot tables behind one lock, so the version check and the
// append are a single critical section. Used by tests and by the demo when
// no database is configured.
//
// ============================================================================

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, Vec<StoredEvent>>,
    snapshots: HashMap<Uuid, Vec<StoredSnapshot>>,
}

/// Read queries issued against the store, for asserting load strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryLog {
    pub all_events: usize,
    /// The `sequence` argument of every tail query, in call order.
    pub events_since: Vec<i64>,
    pub max_version: usize,
    pub appends: usize,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    queries: parking_lot::Mutex<QueryLog>,
    fail_next_append: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queries(&self) -> QueryLog {
        self.queries.lock().clone()
    }

    pub fn reset_queries(&self) {
        *self.queries.lock() = QueryLog::default();
    }

    /// Make the next append fail with a storage error without writing.
    pub fn fail_next_append(&self) {
        self.fail_next_append.store(true, Ordering::SeqCst);
    }

    pub async fn event_count(&self, aggregate_id: Uuid) -> usize {
        self.tables
            .read()
            .await
            .events
            .get(&aggregate_id)
            .map_or(0, Vec::len)
    }

    pub async fn snapshots(&self, aggregate_id: Uuid) -> Vec<StoredSnapshot> {
        self.tables
            .read()
            .await
            .snapshots
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default()
    }

    fn sorted(mut events: Vec<StoredEvent>) -> Vec<StoredEvent> {
        events.sort_by_key(|e| e.sequence);
        events
    }
}

impl Tables {
    fn max_version(&self, aggregate_id: Uuid) -> i64 {
        self.events
            .get(&aggregate_id)
            .and_then(|rows| rows.iter().map(|e| e.aggregate_version).max())
            .unwrap_or(0)
    }

    fn max_sequence(&self, aggregate_id: Uuid) -> i64 {
        self.events
            .get(&aggregate_id)
            .and_then(|rows| rows.iter().map(|e| e.sequence).max())
            .unwrap_or(0)
    }

    fn filtered(&self, aggregate_id: Uuid, keep: impl Fn(&StoredEvent) -> bool) -> Vec<StoredEvent> {
        self.events
            .get(&aggregate_id)
            .map(|rows| rows.iter().filter(|e| keep(*e)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventLog for InMemoryStore {
    async fn max_version(&self, aggregate_id: Uuid) -> Result<i64, StorageError> {
        self.queries.lock().max_version += 1;
        Ok(self.tables.read().await.max_version(aggregate_id))
    }

    async fn max_sequence(&self, aggregate_id: Uuid) -> Result<i64, StorageError> {
        Ok(self.tables.read().await.max_sequence(aggregate_id))
    }

    async fn all_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, StorageError> {
        self.queries.lock().all_events += 1;
        let rows = self.tables.read().await.filtered(aggregate_id, |_| true);
        Ok(Self::sorted(rows))
    }

    async fn events_since(
        &self,
        aggregate_id: Uuid,
        sequence: i64,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        self.queries.lock().events_since.push(sequence);
        let rows = self
            .tables
            .read()
            .await
            .filtered(aggregate_id, |e| e.sequence > sequence);
        Ok(Self::sorted(rows))
    }

    async fn events_of_type(
        &self,
        aggregate_id: Uuid,
        event_types: &[&str],
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let rows = self
            .tables
            .read()
            .await
            .filtered(aggregate_id, |e| event_types.contains(&e.event_type.as_str()));
        Ok(Self::sorted(rows))
    }

    async fn append(&self, batch: AppendBatch) -> Result<AppendOutcome, StorageError> {
        let mut tables = self.tables.write().await;
        self.queries.lock().appends += 1;

        if self.fail_next_append.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected append failure".into()));
        }

        let persisted = tables.max_version(batch.aggregate_id);
        if persisted != batch.expected_version {
            return Ok(AppendOutcome::VersionMismatch { persisted });
        }

        // Sequence is unique per aggregate.
        let last_sequence = tables.max_sequence(batch.aggregate_id);
        if batch.events.iter().any(|e| e.sequence <= last_sequence) {
            return Ok(AppendOutcome::VersionMismatch { persisted });
        }

        tables
            .events
            .entry(batch.aggregate_id)
            .or_default()
            .extend(batch.events);

        if let Some(snapshot) = batch.snapshot {
            tables
                .snapshots
                .entry(snapshot.aggregate_id)
                .or_default()
                .push(snapshot);
        }

        Ok(AppendOutcome::Committed)
    }
}

#[async_trait]
impl SnapshotStorage for InMemoryStore {
    async fn latest_snapshot(&self, aggregate_id: Uuid) -> Result<Option<StoredSnapshot>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .snapshots
            .get(&aggregate_id)
            .and_then(|rows| rows.iter().max_by_key(|s| s.last_sequence).cloned()))
    }

    async fn insert_snapshot(&self, snapshot: StoredSnapshot) -> Result<(), StorageError> {
        self.tables
            .write()
            .await
            .snapshots
            .entry(snapshot.aggregate_id)
            .or_default()
            .push(snapshot);
        Ok(())
    }
}
