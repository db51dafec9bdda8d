use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::event_sourcing::core::StorageError;
use super::persistence::{
    AppendBatch, AppendOutcome, EventLog, SnapshotStorage, StoredEvent, StoredSnapshot,
};

// ============================================================================
// PostgreSQL Backend
// ============================================================================
//
// Tables:
// - aggregate_events: append-only log, unique on (aggregate_id, sequence)
// - aggregate_snapshots: insert-only checkpoints
//
// Appends run in one transaction holding a transaction-scoped advisory lock
// keyed on the aggregate id, so the version check and the inserts cannot be
// interleaved by another writer.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS aggregate_events (
        event_id UUID PRIMARY KEY,
        aggregate_id UUID NOT NULL,
        sequence BIGINT NOT NULL,
        event_type VARCHAR(200) NOT NULL,
        payload TEXT NOT NULL,
        aggregate_version BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (aggregate_id, sequence)
    )",
    "CREATE INDEX IF NOT EXISTS ix_aggregate_events_version
        ON aggregate_events (aggregate_id, aggregate_version)",
    "CREATE TABLE IF NOT EXISTS aggregate_snapshots (
        snapshot_id UUID PRIMARY KEY,
        aggregate_id UUID NOT NULL,
        last_sequence BIGINT NOT NULL,
        version BIGINT NOT NULL,
        payload TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_aggregate_snapshots_latest
        ON aggregate_snapshots (aggregate_id, last_sequence DESC)",
];

const EVENT_COLUMNS: &str =
    "event_id, aggregate_id, sequence, event_type, payload, aggregate_version, created_at";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections = max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("Event store schema is up to date");
        Ok(())
    }

    async fn fetch_events(
        &self,
        sql: &str,
        aggregate_id: Uuid,
        sequence: Option<i64>,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let mut query = sqlx::query(sql).bind(aggregate_id);
        if let Some(sequence) = sequence {
            query = query.bind(sequence);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }
}

/// Advisory lock key for an aggregate: both halves of the UUID folded together.
pub(crate) fn advisory_lock_key(aggregate_id: Uuid) -> i64 {
    let (high, low) = aggregate_id.as_u64_pair();
    (high ^ low) as i64
}

fn event_from_row(row: &PgRow) -> Result<StoredEvent, StorageError> {
    Ok(StoredEvent {
        event_id: row.try_get("event_id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        sequence: row.try_get("sequence")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        aggregate_version: row.try_get("aggregate_version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<StoredSnapshot, StorageError> {
    Ok(StoredSnapshot {
        snapshot_id: row.try_get("snapshot_id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        last_sequence: row.try_get("last_sequence")?,
        version: row.try_get("version")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl EventLog for PostgresStore {
    async fn max_version(&self, aggregate_id: Uuid) -> Result<i64, StorageError> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(aggregate_version), 0)::BIGINT FROM aggregate_events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(version)
    }

    async fn max_sequence(&self, aggregate_id: Uuid) -> Result<i64, StorageError> {
        let sequence: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0)::BIGINT FROM aggregate_events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sequence)
    }

    async fn all_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, StorageError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM aggregate_events WHERE aggregate_id = $1 ORDER BY sequence ASC"
        );
        self.fetch_events(&sql, aggregate_id, None).await
    }

    async fn events_since(
        &self,
        aggregate_id: Uuid,
        sequence: i64,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM aggregate_events
             WHERE aggregate_id = $1 AND sequence > $2 ORDER BY sequence ASC"
        );
        self.fetch_events(&sql, aggregate_id, Some(sequence)).await
    }

    async fn events_of_type(
        &self,
        aggregate_id: Uuid,
        event_types: &[&str],
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let event_types: Vec<String> = event_types.iter().map(|t| t.to_string()).collect();
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM aggregate_events
             WHERE aggregate_id = $1 AND event_type = ANY($2) ORDER BY sequence ASC"
        );

        let rows = sqlx::query(&sql)
            .bind(aggregate_id)
            .bind(event_types)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn append(&self, batch: AppendBatch) -> Result<AppendOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_lock_key(batch.aggregate_id))
            .execute(&mut *tx)
            .await?;

        let persisted: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(aggregate_version), 0)::BIGINT FROM aggregate_events WHERE aggregate_id = $1",
        )
        .bind(batch.aggregate_id)
        .fetch_one(&mut *tx)
        .await?;

        if persisted != batch.expected_version {
            tx.rollback().await?;
            return Ok(AppendOutcome::VersionMismatch { persisted });
        }

        for event in &batch.events {
            let inserted = sqlx::query(
                "INSERT INTO aggregate_events (
                    event_id, aggregate_id, sequence, event_type, payload, aggregate_version, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(event.event_id)
            .bind(event.aggregate_id)
            .bind(event.sequence)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(event.aggregate_version)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(error) if is_unique_violation(&error) => {
                    tx.rollback().await?;
                    return Ok(AppendOutcome::VersionMismatch { persisted });
                }
                Err(error) => return Err(error.into()),
            }
        }

        if let Some(snapshot) = &batch.snapshot {
            sqlx::query(
                "INSERT INTO aggregate_snapshots (
                    snapshot_id, aggregate_id, last_sequence, version, payload, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(snapshot.snapshot_id)
            .bind(snapshot.aggregate_id)
            .bind(snapshot.last_sequence)
            .bind(snapshot.version)
            .bind(&snapshot.payload)
            .bind(snapshot.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(AppendOutcome::Committed)
    }
}

#[async_trait]
impl SnapshotStorage for PostgresStore {
    async fn latest_snapshot(&self, aggregate_id: Uuid) -> Result<Option<StoredSnapshot>, StorageError> {
        let row = sqlx::query(
            "SELECT snapshot_id, aggregate_id, last_sequence, version, payload, created_at
             FROM aggregate_snapshots
             WHERE aggregate_id = $1
             ORDER BY last_sequence DESC
             LIMIT 1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn insert_snapshot(&self, snapshot: StoredSnapshot) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO aggregate_snapshots (
                snapshot_id, aggregate_id, last_sequence, version, payload, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(snapshot.snapshot_id)
        .bind(snapshot.aggregate_id)
        .bind(snapshot.last_sequence)
        .bind(snapshot.version)
        .bind(snapshot.payload)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
