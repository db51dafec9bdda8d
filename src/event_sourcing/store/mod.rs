// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// This module contains GENERIC persistence infrastructure for event sourcing.
// All components work with ANY aggregate/event type.
//
// Backends:
// - memory: single-process tables, used by tests and the demo
// - postgres: durable log and snapshots behind sqlx
//
// ============================================================================

pub mod event_store;
pub mod memory;
pub mod persistence;
pub mod postgres;
pub mod snapshot;

pub use event_store::EventStore;
pub use memory::{InMemoryStore, QueryLog};
pub use persistence::{
    AppendBatch, AppendOutcome, EventLog, SnapshotStorage, StoredEvent, StoredSnapshot,
};
pub use postgres::PostgresStore;
pub use snapshot::{SnapshotRepository, DEFAULT_SNAPSHOT_INTERVAL};
