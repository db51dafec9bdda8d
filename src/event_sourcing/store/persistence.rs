use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event_sourcing::core::StorageError;

// ============================================================================
// Persistence Collaborator - Row Shapes and Backend Contracts
// ============================================================================
//
// The event store only ever talks to storage through these traits. Rows are
// already serialized; backends never see domain types.
//
// ============================================================================

/// One row of the durable event log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence: i64,
    pub event_type: String,
    pub payload: String,
    pub aggregate_version: i64,
    pub created_at: DateTime<Utc>,
}

/// One checkpoint row. Rows are only ever inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub snapshot_id: Uuid,
    pub aggregate_id: Uuid,
    pub last_sequence: i64,
    pub version: i64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Everything one save writes, committed as a single unit.
#[derive(Debug, Clone)]
pub struct AppendBatch {
    pub aggregate_id: Uuid,
    /// Highest version the writer observed in the log before staging.
    pub expected_version: i64,
    pub events: Vec<StoredEvent>,
    pub snapshot: Option<StoredSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Committed,
    /// Another writer moved the log first; nothing was written.
    VersionMismatch { persisted: i64 },
}

/// Durable, ordered log of events keyed by aggregate id.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Highest persisted version for the aggregate, 0 if it has no events.
    async fn max_version(&self, aggregate_id: Uuid) -> Result<i64, StorageError>;

    /// Highest persisted sequence for the aggregate, 0 if it has no events.
    async fn max_sequence(&self, aggregate_id: Uuid) -> Result<i64, StorageError>;

    /// Full history, ascending by sequence.
    async fn all_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, StorageError>;

    /// Events with a sequence strictly greater than `sequence`.
    async fn events_since(
        &self,
        aggregate_id: Uuid,
        sequence: i64,
    ) -> Result<Vec<StoredEvent>, StorageError>;

    /// Events whose type tag is one of `event_types`, ascending by sequence.
    async fn events_of_type(
        &self,
        aggregate_id: Uuid,
        event_types: &[&str],
    ) -> Result<Vec<StoredEvent>, StorageError>;

    /// Conditional append. The version check, the event rows and the optional
    /// snapshot row succeed or fail together.
    async fn append(&self, batch: AppendBatch) -> Result<AppendOutcome, StorageError>;
}

/// Storage for aggregate checkpoints.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// The snapshot with the greatest `last_sequence` for the aggregate.
    async fn latest_snapshot(&self, aggregate_id: Uuid) -> Result<Option<StoredSnapshot>, StorageError>;

    async fn insert_snapshot(&self, snapshot: StoredSnapshot) -> Result<(), StorageError>;
}
