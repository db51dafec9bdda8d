use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::error::Result;
use super::event::{DomainEvent, EventEnvelope};

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Business operations stage events through apply_change
// 3. Replay applies history without staging anything
// 4. Version moves once per save batch, sequence once per event
//
// The business state lives in a type implementing `Aggregate`; the
// bookkeeping (id, version, sequence, staging queue) lives in the generic
// `AggregateRoot` wrapper so no domain type can get it wrong.
//
// ============================================================================

/// Business state of an event-sourced aggregate.
///
/// `Default` is the zero-value state replay starts from. Serde is required
/// because snapshots capture the full state.
pub trait Aggregate:
    Default + Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Event: DomainEvent;

    /// Stable name used in snapshot payloads, logs and metrics.
    fn aggregate_type() -> &'static str;

    /// State transition for one event.
    ///
    /// Must be deterministic. Returns `UnknownEventVariant` for an event the
    /// aggregate has no transition for, without touching state.
    fn apply(&mut self, event: &Self::Event) -> Result<()>;
}

/// Generic event-sourced root wrapping an aggregate's business state.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: Uuid,
    version: i64,
    last_sequence: i64,
    state: A,
    uncommitted: Vec<EventEnvelope<A::Event>>,
    // Set by the first apply_change of a batch, cleared when the batch commits.
    batch_open: bool,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Zero-value aggregate: version 0, sequence 0, default state.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            last_sequence: 0,
            state: A::default(),
            uncommitted: Vec::new(),
            batch_open: false,
        }
    }

    /// Restore a checkpointed aggregate with its full field set.
    ///
    /// Only the snapshot decoder may call this; everything else goes through
    /// `apply_change` or `replay`.
    pub(crate) fn rehydrate(id: Uuid, version: i64, last_sequence: i64, state: A) -> Self {
        Self {
            id,
            version,
            last_sequence,
            state,
            uncommitted: Vec::new(),
            batch_open: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn last_sequence(&self) -> i64 {
        self.last_sequence
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn uncommitted_events(&self) -> &[EventEnvelope<A::Event>] {
        &self.uncommitted
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Record a business-level change.
    ///
    /// State is mutated first so later operations in the same batch see it.
    /// The version moves only on the first call of a batch; every call takes
    /// the next sequence number and stages one envelope.
    pub fn apply_change(&mut self, event: A::Event) -> Result<()> {
        self.state.apply(&event)?;

        if !self.batch_open {
            self.version += 1;
            self.batch_open = true;
        }

        self.last_sequence += 1;

        tracing::trace!(
            aggregate_id = %self.id,
            aggregate_type = A::aggregate_type(),
            event_type = event.event_type(),
            sequence = self.last_sequence,
            version = self.version,
            "Staged event"
        );

        self.uncommitted
            .push(EventEnvelope::new(self.id, self.last_sequence, self.version, event));
        Ok(())
    }

    /// Rebuild state from historical envelopes, in ascending sequence order
    /// regardless of input order. Version and sequence are taken verbatim
    /// from each envelope; nothing is staged.
    pub fn replay<I>(&mut self, envelopes: I) -> Result<()>
    where
        I: IntoIterator<Item = EventEnvelope<A::Event>>,
    {
        let mut ordered: Vec<_> = envelopes.into_iter().collect();
        ordered.sort_by_key(|envelope| envelope.sequence);

        for envelope in &ordered {
            self.state.apply(&envelope.event)?;
            self.last_sequence = envelope.sequence;
            self.version = envelope.aggregate_version;
        }

        if !ordered.is_empty() {
            tracing::debug!(
                aggregate_id = %self.id,
                aggregate_type = A::aggregate_type(),
                replayed = ordered.len(),
                version = self.version,
                last_sequence = self.last_sequence,
                "Replayed events"
            );
        }

        Ok(())
    }

    /// Drain the staging queue and close the current batch.
    pub fn take_uncommitted(&mut self) -> Vec<EventEnvelope<A::Event>> {
        self.batch_open = false;
        std::mem::take(&mut self.uncommitted)
    }

    /// Clear the staging queue after a successful save.
    ///
    /// Closing the batch here means a reused instance starts a fresh batch
    /// (and a fresh version) on its next change.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
        self.batch_open = false;
    }
}
