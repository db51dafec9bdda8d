use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::bus::EventBus;
use crate::event_sourcing::core::{
    deserialize_event, serialize_event, Aggregate, AggregateRoot, EventEnvelope,
    EventSourcingError, Result,
};
use crate::metrics::{Metrics, SaveOutcome};
use super::persistence::{AppendBatch, AppendOutcome, EventLog, StoredEvent};
use super::snapshot::SnapshotRepository;

// ============================================================================
// Generic Event Store - Load/Save Orchestration
// ============================================================================
//
// Type Parameter:
// - `A`: the aggregate whose events this store persists
//
// Responsibilities:
// 1. Load: latest snapshot (if any) + tail of the log, replayed in order
// 2. Save: version check, conditional append, optional snapshot, one commit
// 3. Publish committed events through the event bus
// 4. Clear the aggregate's staging queue once everything above succeeded
//
// A publish failure is reported to the caller but never rolls back the
// commit: committed events stay durable even if a subscriber missed them.
//
// ============================================================================

pub struct EventStore<A: Aggregate> {
    log: Arc<dyn EventLog>,
    snapshots: Option<SnapshotRepository<A>>,
    bus: Option<EventBus<A::Event>>,
    require_subscribers: bool,
    metrics: Option<Arc<Metrics>>,
}

impl<A: Aggregate> EventStore<A> {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            snapshots: None,
            bus: None,
            require_subscribers: true,
            metrics: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotRepository<A>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus<A::Event>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Whether publishing an event nobody subscribed to fails the save.
    /// Defaults to true.
    pub fn require_subscribers(mut self, required: bool) -> Self {
        self.require_subscribers = required;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn snapshots(&self) -> Option<&SnapshotRepository<A>> {
        self.snapshots.as_ref()
    }

    /// Rehydrate an aggregate. Unknown ids come back as a zero-value
    /// aggregate at version 0.
    pub async fn load(&self, aggregate_id: Uuid) -> Result<AggregateRoot<A>> {
        let baseline = match &self.snapshots {
            Some(repository) => repository.get_latest(aggregate_id).await?,
            None => None,
        };

        let (mut root, rows) = match baseline {
            Some(root) => {
                let durable = self.log.max_sequence(aggregate_id).await?;
                if root.last_sequence() > durable {
                    return Err(EventSourcingError::deserialization(
                        format!("{} snapshot of {aggregate_id}", A::aggregate_type()),
                        format!(
                            "positioned at sequence {} beyond the event log at {durable}",
                            root.last_sequence()
                        ),
                    ));
                }
                let rows = self.log.events_since(aggregate_id, root.last_sequence()).await?;
                (root, rows)
            }
            None => (AggregateRoot::new(aggregate_id), self.log.all_events(aggregate_id).await?),
        };

        let replayed = rows.len();
        let envelopes = rows
            .into_iter()
            .map(Self::decode)
            .collect::<Result<Vec<_>>>()?;
        root.replay(envelopes)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_replay(A::aggregate_type(), replayed);
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            aggregate_type = A::aggregate_type(),
            version = root.version(),
            last_sequence = root.last_sequence(),
            replayed = replayed,
            "Loaded aggregate"
        );

        Ok(root)
    }

    /// Persist the aggregate's staged events.
    ///
    /// Requires exactly one batch of work on top of the durable version, so
    /// saving an unchanged aggregate is a conflict too. A batch whose events
    /// were drained with `take_uncommitted` is rejected. On any error the
    /// staged events are left in place.
    pub async fn save(&self, root: &mut AggregateRoot<A>) -> Result<()> {
        let aggregate_id = root.id();

        let persisted = self
            .log
            .max_version(aggregate_id)
            .await
            .inspect_err(|_| self.record_save(SaveOutcome::Failed))?;

        if root.version() != persisted + 1 {
            return Err(self.conflict(root, persisted));
        }

        if !root.has_uncommitted_events() {
            self.record_save(SaveOutcome::Failed);
            return Err(EventSourcingError::InvalidBatch {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
                reason: "no staged events to save",
            });
        }

        let events = root
            .uncommitted_events()
            .iter()
            .map(Self::encode)
            .collect::<Result<Vec<_>>>()
            .inspect_err(|_| self.record_save(SaveOutcome::Failed))?;
        let event_count = events.len();

        let snapshot = match &self.snapshots {
            Some(repository) if repository.is_due(root.uncommitted_events()) => Some(
                repository
                    .capture(root)
                    .inspect_err(|_| self.record_save(SaveOutcome::Failed))?,
            ),
            _ => None,
        };
        let snapshot_written = snapshot.is_some();

        let batch = AppendBatch {
            aggregate_id,
            expected_version: persisted,
            events,
            snapshot,
        };

        match self.log.append(batch).await {
            Ok(AppendOutcome::Committed) => {}
            Ok(AppendOutcome::VersionMismatch { persisted }) => {
                return Err(self.conflict(root, persisted));
            }
            Err(error) => {
                self.record_save(SaveOutcome::Failed);
                tracing::error!(
                    aggregate_id = %aggregate_id,
                    aggregate_type = A::aggregate_type(),
                    error = %error,
                    "Append failed"
                );
                return Err(error.into());
            }
        }

        self.record_save(SaveOutcome::Committed);
        if let Some(metrics) = &self.metrics {
            metrics.record_commit(A::aggregate_type(), event_count, snapshot_written);
        }

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = A::aggregate_type(),
            version = root.version(),
            last_sequence = root.last_sequence(),
            event_count = event_count,
            snapshot = snapshot_written,
            "✅ Appended events to event store"
        );

        self.publish(root)?;
        root.mark_committed();
        Ok(())
    }

    /// Full decoded history, ascending by sequence.
    pub async fn events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<A::Event>>> {
        let rows = self.log.all_events(aggregate_id).await?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// Decoded events with a sequence greater than `sequence`.
    pub async fn events_since(
        &self,
        aggregate_id: Uuid,
        sequence: i64,
    ) -> Result<Vec<EventEnvelope<A::Event>>> {
        let rows = self.log.events_since(aggregate_id, sequence).await?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// Decoded events whose type tag is one of `event_types`.
    pub async fn events_of_type(
        &self,
        aggregate_id: Uuid,
        event_types: &[&str],
    ) -> Result<Vec<EventEnvelope<A::Event>>> {
        let rows = self.log.events_of_type(aggregate_id, event_types).await?;
        rows.into_iter().map(Self::decode).collect()
    }

    fn publish(&self, root: &AggregateRoot<A>) -> Result<()> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };

        for envelope in root.uncommitted_events() {
            let result = bus.publish(&envelope.event, self.require_subscribers);

            if let Some(metrics) = &self.metrics {
                metrics.record_publish(&envelope.event_type, result.is_ok());
            }

            if let Err(error) = result {
                tracing::warn!(
                    aggregate_id = %root.id(),
                    event_type = %envelope.event_type,
                    sequence = envelope.sequence,
                    error = %error,
                    "Publish failed after commit; events remain durable"
                );
                return Err(error);
            }
        }

        Ok(())
    }

    fn conflict(&self, root: &AggregateRoot<A>, persisted: i64) -> EventSourcingError {
        self.record_save(SaveOutcome::Conflict);

        tracing::warn!(
            aggregate_id = %root.id(),
            aggregate_type = A::aggregate_type(),
            attempted = root.version(),
            persisted = persisted,
            staged = root.uncommitted_events().len(),
            "Concurrency conflict, nothing persisted"
        );

        EventSourcingError::ConcurrencyConflict {
            aggregate_type: A::aggregate_type(),
            aggregate_id: root.id(),
            attempted: root.version(),
            persisted,
        }
    }

    fn record_save(&self, outcome: SaveOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_save(A::aggregate_type(), outcome);
        }
    }

    fn encode(envelope: &EventEnvelope<A::Event>) -> Result<StoredEvent> {
        Ok(StoredEvent {
            event_id: envelope.event_id,
            aggregate_id: envelope.aggregate_id,
            sequence: envelope.sequence,
            event_type: envelope.event_type.clone(),
            payload: serialize_event(&envelope.event)?,
            aggregate_version: envelope.aggregate_version,
            created_at: envelope.created_at,
        })
    }

    fn decode(row: StoredEvent) -> Result<EventEnvelope<A::Event>> {
        let event = deserialize_event(&row.event_type, &row.payload)?;
        Ok(EventEnvelope::restore(
            row.event_id,
            row.aggregate_id,
            row.sequence,
            row.aggregate_version,
            row.event_type,
            event,
            row.created_at,
        ))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::bus::EventHandler;
    use crate::event_sourcing::core::aggregate::tests::{Counter, CounterEvent};
    use crate::event_sourcing::core::{DomainEvent, StorageError};
    use crate::event_sourcing::store::memory::InMemoryStore;
    use crate::event_sourcing::store::persistence::SnapshotStorage;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use tokio::sync::Barrier;

    fn store(backend: &Arc<InMemoryStore>) -> EventStore<Counter> {
        EventStore::new(backend.clone())
    }

    fn snapshotting_store(backend: &Arc<InMemoryStore>, interval: i64) -> EventStore<Counter> {
        store(backend).with_snapshots(SnapshotRepository::new(backend.clone()).with_interval(interval))
    }

    fn add(root: &mut AggregateRoot<Counter>, count: i64) {
        for _ in 0..count {
            root.apply_change(CounterEvent::Added { amount: 1 }).unwrap();
        }
    }

    async fn load_add_save(store: &EventStore<Counter>, id: Uuid, count: i64) {
        let mut root = store.load(id).await.unwrap();
        add(&mut root, count);
        store.save(&mut root).await.unwrap();
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl EventHandler<CounterEvent> for Recorder {
        fn handle(&self, event: &CounterEvent) -> anyhow::Result<()> {
            self.0.lock().push(format!("{event:?}"));
            Ok(())
        }
    }

    struct Broken;

    impl EventHandler<CounterEvent> for Broken {
        fn handle(&self, _event: &CounterEvent) -> anyhow::Result<()> {
            anyhow::bail!("read model unavailable")
        }
    }

    /// Holds every writer after its version pre-check until all of them
    /// have read the same durable version.
    struct GatedLog {
        inner: Arc<InMemoryStore>,
        gate: Barrier,
    }

    #[async_trait]
    impl EventLog for GatedLog {
        async fn max_version(&self, aggregate_id: Uuid) -> Result<i64, StorageError> {
            let version = self.inner.max_version(aggregate_id).await;
            self.gate.wait().await;
            version
        }

        async fn max_sequence(&self, aggregate_id: Uuid) -> Result<i64, StorageError> {
            self.inner.max_sequence(aggregate_id).await
        }

        async fn all_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, StorageError> {
            self.inner.all_events(aggregate_id).await
        }

        async fn events_since(
            &self,
            aggregate_id: Uuid,
            sequence: i64,
        ) -> Result<Vec<StoredEvent>, StorageError> {
            self.inner.events_since(aggregate_id, sequence).await
        }

        async fn events_of_type(
            &self,
            aggregate_id: Uuid,
            event_types: &[&str],
        ) -> Result<Vec<StoredEvent>, StorageError> {
            self.inner.events_of_type(aggregate_id, event_types).await
        }

        async fn append(&self, batch: AppendBatch) -> Result<AppendOutcome, StorageError> {
            self.inner.append(batch).await
        }
    }

    // Tuple map keys have no JSON form, so encoding these always fails.
    #[derive(Serialize, Deserialize, Clone, Debug)]
    #[serde(tag = "type", content = "data")]
    enum PairEvent {
        Counted { left: i64, right: i64 },
        Merged { counts: HashMap<(i64, i64), i64> },
    }

    impl DomainEvent for PairEvent {
        fn event_type(&self) -> &'static str {
            match self {
                PairEvent::Counted { .. } => "Counted",
                PairEvent::Merged { .. } => "Merged",
            }
        }
    }

    #[derive(Serialize, Deserialize, Clone, Debug, Default)]
    struct PairTally {
        counts: HashMap<(i64, i64), i64>,
    }

    impl Aggregate for PairTally {
        type Event = PairEvent;

        fn aggregate_type() -> &'static str {
            "PairTally"
        }

        fn apply(&mut self, event: &Self::Event) -> Result<()> {
            match event {
                PairEvent::Counted { left, right } => {
                    *self.counts.entry((*left, *right)).or_default() += 1;
                }
                PairEvent::Merged { counts } => {
                    for (pair, count) in counts {
                        *self.counts.entry(*pair).or_default() += count;
                    }
                }
            }
            Ok(())
        }
    }

    fn failed_saves(metrics: &Metrics, aggregate_type: &str) -> u64 {
        metrics.saves_total.with_label_values(&[aggregate_type, "failed"]).get()
    }

    #[tokio::test]
    async fn test_unknown_id_loads_zero_value() {
        let backend = Arc::new(InMemoryStore::new());
        let root = store(&backend).load(Uuid::new_v4()).await.unwrap();

        assert_eq!(root.version(), 0);
        assert_eq!(root.last_sequence(), 0);
        assert_eq!(root.state(), &Counter::default());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend);
        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        add(&mut root, 3);
        root.apply_change(CounterEvent::Labelled { label: "done".into() }).unwrap();

        store.save(&mut root).await.unwrap();
        assert!(!root.has_uncommitted_events());

        let loaded = store.load(root.id()).await.unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.last_sequence(), 4);
        assert_eq!(loaded.state(), root.state());
    }

    #[tokio::test]
    async fn test_sequences_gapless_and_versions_per_save() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend);
        let id = Uuid::new_v4();
        let batches = [4, 1, 3, 2, 5];

        for count in batches {
            load_add_save(&store, id, count).await;
        }

        let events = store.events(id).await.unwrap();
        let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=15).collect::<Vec<_>>());

        let mut versions: Vec<i64> = events.iter().map(|e| e.aggregate_version).collect();
        versions.dedup();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(events.iter().filter(|e| e.aggregate_version == 3).count(), 3);
    }

    #[tokio::test]
    async fn test_reused_instance_keeps_incrementing_version() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend);
        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());

        for _ in 0..3 {
            add(&mut root, 2);
            store.save(&mut root).await.unwrap();
        }

        assert_eq!(root.version(), 3);
        assert_eq!(backend.max_version(root.id()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_saving_unchanged_aggregate_is_a_conflict() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend);
        let id = Uuid::new_v4();
        load_add_save(&store, id, 1).await;

        let mut root = store.load(id).await.unwrap();
        add(&mut root, 1);
        store.save(&mut root).await.unwrap();
        assert_eq!(backend.max_version(id).await.unwrap(), 2);

        let err = store.save(&mut root).await.unwrap_err();
        assert!(matches!(
            err,
            EventSourcingError::ConcurrencyConflict { attempted: 2, persisted: 2, .. }
        ));
        assert_eq!(backend.event_count(id).await, 2);
    }

    #[tokio::test]
    async fn test_stale_writer_is_rejected() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend);
        let id = Uuid::new_v4();
        load_add_save(&store, id, 2).await;

        let mut first = store.load(id).await.unwrap();
        let mut second = store.load(id).await.unwrap();
        add(&mut first, 1);
        add(&mut second, 1);

        store.save(&mut first).await.unwrap();
        let err = store.save(&mut second).await.unwrap_err();

        assert!(err.is_concurrency_conflict());
        assert_eq!(second.uncommitted_events().len(), 1);
        assert_eq!(backend.event_count(id).await, 3);
    }

    #[tokio::test]
    async fn test_concurrent_saves_exactly_one_wins() {
        let backend = Arc::new(InMemoryStore::new());
        let store = Arc::new(store(&backend));
        let id = Uuid::new_v4();
        load_add_save(&store, id, 1).await;

        let mut left = store.load(id).await.unwrap();
        let mut right = store.load(id).await.unwrap();
        add(&mut left, 2);
        add(&mut right, 3);

        let left_store = store.clone();
        let right_store = store.clone();
        let left_task = tokio::spawn(async move { left_store.save(&mut left).await });
        let right_task = tokio::spawn(async move { right_store.save(&mut right).await });

        let results = [left_task.await.unwrap(), right_task.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_concurrency_conflict()))
            .count();

        assert_eq!((wins, conflicts), (1, 1));
        assert_eq!(backend.max_version(id).await.unwrap(), 2);

        let sequences: Vec<i64> = store.events(id).await.unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=sequences.len() as i64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_writers_past_the_precheck_are_settled_by_append() {
        let backend = Arc::new(InMemoryStore::new());
        let id = Uuid::new_v4();
        load_add_save(&store(&backend), id, 1).await;

        let gated = EventStore::<Counter>::new(Arc::new(GatedLog {
            inner: backend.clone(),
            gate: Barrier::new(2),
        }));
        let mut left = gated.load(id).await.unwrap();
        let mut right = gated.load(id).await.unwrap();
        add(&mut left, 2);
        add(&mut right, 3);

        backend.reset_queries();
        let (left_result, right_result) = tokio::join!(gated.save(&mut left), gated.save(&mut right));

        let queries = backend.queries();
        assert_eq!(queries.max_version, 2);
        assert_eq!(queries.appends, 2);

        let results = [left_result, right_result];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            loser,
            EventSourcingError::ConcurrencyConflict { attempted: 2, persisted: 2, .. }
        ));

        assert_eq!(backend.max_version(id).await.unwrap(), 2);
        let sequences: Vec<i64> = backend.all_events(id).await.unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=sequences.len() as i64).collect::<Vec<_>>());
        assert!(sequences.len() == 3 || sequences.len() == 4);
    }

    #[tokio::test]
    async fn test_drained_batch_is_rejected() {
        let backend = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = store(&backend).with_metrics(metrics.clone());
        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        add(&mut root, 2);

        assert_eq!(root.take_uncommitted().len(), 2);
        let err = store.save(&mut root).await.unwrap_err();

        assert!(matches!(err, EventSourcingError::InvalidBatch { .. }));
        assert_eq!(backend.event_count(root.id()).await, 0);
        assert_eq!(backend.max_version(root.id()).await.unwrap(), 0);
        assert_eq!(failed_saves(&metrics, "Counter"), 1);
    }

    #[tokio::test]
    async fn test_encode_failure_counts_as_failed_save() {
        let backend = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = EventStore::<PairTally>::new(backend.clone()).with_metrics(metrics.clone());
        let mut root = AggregateRoot::<PairTally>::new(Uuid::new_v4());
        root.apply_change(PairEvent::Merged { counts: HashMap::from([((1, 2), 3)]) }).unwrap();

        let err = store.save(&mut root).await.unwrap_err();

        assert!(matches!(err, EventSourcingError::Serialization { .. }));
        assert_eq!(failed_saves(&metrics, "PairTally"), 1);
        assert_eq!(backend.event_count(root.id()).await, 0);
        assert_eq!(root.uncommitted_events().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_capture_failure_counts_as_failed_save() {
        let backend = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = EventStore::<PairTally>::new(backend.clone())
            .with_snapshots(SnapshotRepository::new(backend.clone()).with_interval(1))
            .with_metrics(metrics.clone());
        let mut root = AggregateRoot::<PairTally>::new(Uuid::new_v4());
        root.apply_change(PairEvent::Counted { left: 1, right: 2 }).unwrap();

        let err = store.save(&mut root).await.unwrap_err();

        assert!(matches!(err, EventSourcingError::Serialization { .. }));
        assert_eq!(failed_saves(&metrics, "PairTally"), 1);
        assert_eq!(backend.event_count(root.id()).await, 0);
        assert!(backend.snapshots(root.id()).await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_ahead_of_log_fails_load() {
        let backend = Arc::new(InMemoryStore::new());
        let store = snapshotting_store(&backend, 10);
        let id = Uuid::new_v4();
        load_add_save(&store, id, 2).await;

        let mut ahead = store.load(id).await.unwrap();
        add(&mut ahead, 3);
        let row = store.snapshots().unwrap().capture(&ahead).unwrap();
        backend.insert_snapshot(row).await.unwrap();

        let err = store.load(id).await.unwrap_err();

        assert!(matches!(err, EventSourcingError::Deserialization { .. }));
        assert_eq!(backend.event_count(id).await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_written_at_interval_and_used_on_load() {
        let backend = Arc::new(InMemoryStore::new());
        let store = snapshotting_store(&backend, 10);
        let id = Uuid::new_v4();

        load_add_save(&store, id, 4).await;
        load_add_save(&store, id, 5).await;
        assert!(backend.snapshots(id).await.is_empty());

        load_add_save(&store, id, 1).await;
        let snapshots = backend.snapshots(id).await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].last_sequence, 10);
        assert_eq!(snapshots[0].version, 3);

        load_add_save(&store, id, 2).await;

        backend.reset_queries();
        let root = store.load(id).await.unwrap();

        let queries = backend.queries();
        assert_eq!(queries.events_since, vec![10]);
        assert_eq!(queries.all_events, 0);
        assert_eq!(root.last_sequence(), 12);
        assert_eq!(root.version(), 4);
        assert_eq!(root.state().total, 12);
    }

    #[tokio::test]
    async fn test_snapshot_captures_final_position_of_batch() {
        let backend = Arc::new(InMemoryStore::new());
        let store = snapshotting_store(&backend, 10);
        let id = Uuid::new_v4();

        load_add_save(&store, id, 8).await;
        load_add_save(&store, id, 5).await;

        let snapshots = backend.snapshots(id).await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].last_sequence, 13);
        assert_eq!(snapshots[0].version, 2);
    }

    #[tokio::test]
    async fn test_without_snapshots_load_reads_full_history() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend);
        let id = Uuid::new_v4();
        load_add_save(&store, id, 12).await;

        backend.reset_queries();
        store.load(id).await.unwrap();

        let queries = backend.queries();
        assert_eq!(queries.all_events, 1);
        assert!(queries.events_since.is_empty());
        assert!(backend.snapshots(id).await.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_staged_events() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend);
        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        add(&mut root, 2);

        backend.fail_next_append();
        let err = store.save(&mut root).await.unwrap_err();

        assert!(matches!(err, EventSourcingError::Storage(_)));
        assert_eq!(root.uncommitted_events().len(), 2);
        assert_eq!(backend.event_count(root.id()).await, 0);

        store.save(&mut root).await.unwrap();
        assert_eq!(backend.event_count(root.id()).await, 2);
    }

    #[tokio::test]
    async fn test_committed_events_are_published_in_order() {
        let backend = Arc::new(InMemoryStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::<CounterEvent>::default();
        bus.subscribe("Added", Arc::new(Recorder(seen.clone())));
        bus.subscribe("Labelled", Arc::new(Recorder(seen.clone())));
        let store = store(&backend).with_event_bus(bus);

        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        root.apply_change(CounterEvent::Added { amount: 7 }).unwrap();
        root.apply_change(CounterEvent::Labelled { label: "x".into() }).unwrap();
        store.save(&mut root).await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                "Added { amount: 7 }".to_string(),
                "Labelled { label: \"x\" }".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_strict_publish_without_subscriber_reports_after_commit() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend).with_event_bus(EventBus::default());
        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        add(&mut root, 1);

        let err = store.save(&mut root).await.unwrap_err();

        assert!(matches!(err, EventSourcingError::NoSubscriber { .. }));
        assert_eq!(backend.event_count(root.id()).await, 1);
        assert_eq!(root.uncommitted_events().len(), 1);
    }

    #[tokio::test]
    async fn test_lenient_publish_without_subscriber_succeeds() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend)
            .with_event_bus(EventBus::default())
            .require_subscribers(false);
        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        add(&mut root, 1);

        store.save(&mut root).await.unwrap();
        assert!(!root.has_uncommitted_events());
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_roll_back() {
        let backend = Arc::new(InMemoryStore::new());
        let bus = EventBus::<CounterEvent>::default();
        bus.subscribe("Added", Arc::new(Broken));
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = store(&backend).with_event_bus(bus).with_metrics(metrics.clone());

        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        add(&mut root, 2);
        let err = store.save(&mut root).await.unwrap_err();

        assert!(matches!(err, EventSourcingError::Handler { .. }));
        assert_eq!(backend.event_count(root.id()).await, 2);
        assert_eq!(metrics.publish_failures.with_label_values(&["Added"]).get(), 1);
        assert_eq!(metrics.events_appended.with_label_values(&["Counter"]).get(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_row_fails_load() {
        let backend = Arc::new(InMemoryStore::new());
        let id = Uuid::new_v4();
        backend
            .append(AppendBatch {
                aggregate_id: id,
                expected_version: 0,
                events: vec![StoredEvent {
                    event_id: Uuid::now_v7(),
                    aggregate_id: id,
                    sequence: 1,
                    event_type: "Added".into(),
                    payload: "{\"type\":\"Added\",\"data\":{\"amount\":\"lots\"}}".into(),
                    aggregate_version: 1,
                    created_at: Utc::now(),
                }],
                snapshot: None,
            })
            .await
            .unwrap();

        let err = store(&backend).load(id).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::Deserialization { .. }));
    }

    #[tokio::test]
    async fn test_events_of_type_filters_history() {
        let backend = Arc::new(InMemoryStore::new());
        let store = store(&backend);
        let mut root = AggregateRoot::<Counter>::new(Uuid::new_v4());
        add(&mut root, 2);
        root.apply_change(CounterEvent::Labelled { label: "a".into() }).unwrap();
        store.save(&mut root).await.unwrap();

        let labelled = store.events_of_type(root.id(), &["Labelled"]).await.unwrap();
        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled[0].sequence, 3);

        let tail = store.events_since(root.id(), 1).await.unwrap();
        assert_eq!(tail.len(), 2);
    }
}
