use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::event_sourcing::core::{
    deserialize_aggregate, serialize_aggregate, Aggregate, AggregateRoot, EventEnvelope,
    EventSourcingError, Result,
};
use super::persistence::{SnapshotStorage, StoredSnapshot};

// ============================================================================
// Snapshot Repository - Point-in-Time Aggregate Checkpoints
// ============================================================================

pub const DEFAULT_SNAPSHOT_INTERVAL: i64 = 10;

pub struct SnapshotRepository<A: Aggregate> {
    storage: Arc<dyn SnapshotStorage>,
    interval: i64,
    _phantom: PhantomData<fn() -> A>,
}

impl<A: Aggregate> Clone for SnapshotRepository<A> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            interval: self.interval,
            _phantom: PhantomData,
        }
    }
}

impl<A: Aggregate> SnapshotRepository<A> {
    pub fn new(storage: Arc<dyn SnapshotStorage>) -> Self {
        Self {
            storage,
            interval: DEFAULT_SNAPSHOT_INTERVAL,
            _phantom: PhantomData,
        }
    }

    /// Intervals below 1 fall back to 1 (snapshot every event).
    pub fn with_interval(mut self, interval: i64) -> Self {
        self.interval = interval.max(1);
        self
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// True when any envelope lands on an exact multiple of the interval.
    pub fn is_due<E>(&self, envelopes: &[EventEnvelope<E>]) -> bool {
        envelopes.iter().any(|e| e.sequence % self.interval == 0)
    }

    /// Serialize the aggregate's current state into a new snapshot row
    /// without writing it.
    pub fn capture(&self, root: &AggregateRoot<A>) -> Result<StoredSnapshot> {
        Ok(StoredSnapshot {
            snapshot_id: Uuid::now_v7(),
            aggregate_id: root.id(),
            last_sequence: root.last_sequence(),
            version: root.version(),
            payload: serialize_aggregate(root)?,
            created_at: Utc::now(),
        })
    }

    /// Write a snapshot of the aggregate as a new row. Older rows are kept.
    ///
    /// Only committed state may be checkpointed: an aggregate with staged
    /// events is rejected, since its position is ahead of the durable log.
    pub async fn save_snapshot(&self, root: &AggregateRoot<A>) -> Result<()> {
        if root.has_uncommitted_events() {
            return Err(EventSourcingError::InvalidBatch {
                aggregate_type: A::aggregate_type(),
                aggregate_id: root.id(),
                reason: "cannot snapshot an aggregate with uncommitted events",
            });
        }

        let snapshot = self.capture(root)?;
        let last_sequence = snapshot.last_sequence;

        self.storage.insert_snapshot(snapshot).await?;

        tracing::info!(
            aggregate_id = %root.id(),
            aggregate_type = A::aggregate_type(),
            last_sequence = last_sequence,
            "📸 Saved snapshot"
        );
        Ok(())
    }

    /// Latest checkpoint restored as an aggregate, positioned at the
    /// snapshot's `last_sequence` and `version`.
    pub async fn get_latest(&self, aggregate_id: Uuid) -> Result<Option<AggregateRoot<A>>> {
        let Some(snapshot) = self.storage.latest_snapshot(aggregate_id).await? else {
            return Ok(None);
        };

        let root: AggregateRoot<A> = deserialize_aggregate(&snapshot.payload)?;

        if root.id() != aggregate_id
            || root.last_sequence() != snapshot.last_sequence
            || root.version() != snapshot.version
        {
            return Err(EventSourcingError::deserialization(
                format!("{} snapshot {}", A::aggregate_type(), snapshot.snapshot_id),
                "payload does not match its row",
            ));
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            aggregate_type = A::aggregate_type(),
            last_sequence = snapshot.last_sequence,
            version = snapshot.version,
            "Loaded snapshot"
        );

        Ok(Some(root))
    }
}
