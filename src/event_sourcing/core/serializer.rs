use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregate::{Aggregate, AggregateRoot};
use super::error::{EventSourcingError, Result};
use super::event::DomainEvent;

// ============================================================================
// Serializer - Self-Describing Event and Snapshot Payloads
// ============================================================================
//
// Events are adjacently tagged enums ({"type": ..., "data": ...}) so the
// concrete variant survives the round trip. Snapshots wrap the aggregate
// state in a document carrying the aggregate type and its position; the
// staging queue is never part of a snapshot.
//
// ============================================================================

#[derive(Serialize)]
struct SnapshotDocumentRef<'a, A> {
    aggregate_type: &'a str,
    aggregate_id: Uuid,
    version: i64,
    last_sequence: i64,
    state: &'a A,
}

#[derive(Deserialize)]
struct SnapshotDocument<A> {
    aggregate_type: String,
    aggregate_id: Uuid,
    version: i64,
    last_sequence: i64,
    state: A,
}

pub fn serialize_event<E: DomainEvent>(event: &E) -> Result<String> {
    serde_json::to_string(event).map_err(|source| EventSourcingError::Serialization {
        context: format!("event '{}'", event.event_type()),
        source,
    })
}

/// Decode a stored event and check it against the type tag of its row.
pub fn deserialize_event<E: DomainEvent>(event_type: &str, payload: &str) -> Result<E> {
    let event: E = serde_json::from_str(payload)
        .map_err(|e| EventSourcingError::deserialization(format!("event '{event_type}'"), e))?;

    if event.event_type() != event_type {
        return Err(EventSourcingError::deserialization(
            format!("event '{event_type}'"),
            format!("payload decodes as '{}'", event.event_type()),
        ));
    }

    Ok(event)
}

pub fn serialize_aggregate<A: Aggregate>(root: &AggregateRoot<A>) -> Result<String> {
    let document = SnapshotDocumentRef {
        aggregate_type: A::aggregate_type(),
        aggregate_id: root.id(),
        version: root.version(),
        last_sequence: root.last_sequence(),
        state: root.state(),
    };

    serde_json::to_string(&document).map_err(|source| EventSourcingError::Serialization {
        context: format!("{} snapshot", A::aggregate_type()),
        source,
    })
}

pub fn deserialize_aggregate<A: Aggregate>(payload: &str) -> Result<AggregateRoot<A>> {
    let context = || format!("{} snapshot", A::aggregate_type());

    let document: SnapshotDocument<A> = serde_json::from_str(payload)
        .map_err(|e| EventSourcingError::deserialization(context(), e))?;

    if document.aggregate_type != A::aggregate_type() {
        return Err(EventSourcingError::deserialization(
            context(),
            format!("payload belongs to aggregate type '{}'", document.aggregate_type),
        ));
    }

    Ok(AggregateRoot::rehydrate(
        document.aggregate_id,
        document.version,
        document.last_sequence,
        document.state,
    ))
}
