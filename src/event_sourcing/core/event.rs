use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

// ============================================================================
// Event Envelope - Positional Metadata for One Domain Event
// ============================================================================
//
// Two numbering schemes travel on every envelope:
// - sequence: one per event, gapless per aggregate, starts at 1
// - aggregate_version: one per save batch, shared by every event in it
//
// ============================================================================

/// Domain event contract.
///
/// Each aggregate declares a closed enum of variants. `event_type` is the
/// discriminator written to the log and used as the subscription key on the
/// event bus, so it must match the serde tag of the variant.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;
}

/// Immutable record wrapping one domain event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    // Identity
    pub event_id: Uuid,
    pub aggregate_id: Uuid,

    // Position
    pub sequence: i64,
    pub aggregate_version: i64,

    // Payload
    pub event_type: String,
    pub event: E,

    pub created_at: DateTime<Utc>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    /// Wrap a freshly produced event. Event ids are time-ordered.
    pub fn new(aggregate_id: Uuid, sequence: i64, aggregate_version: i64, event: E) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            sequence,
            aggregate_version,
            event_type: event.event_type().to_string(),
            event,
            created_at: Utc::now(),
        }
    }
}

impl<E> EventEnvelope<E> {
    /// Rebuild an envelope exactly as it was recorded in the log.
    pub fn restore(
        event_id: Uuid,
        aggregate_id: Uuid,
        sequence: i64,
        aggregate_version: i64,
        event_type: String,
        event: E,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            sequence,
            aggregate_version,
            event_type,
            event,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[serde(tag = "type", content = "data")]
    enum TestEvent {
        Pinged { count: u32 },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Pinged { .. } => "Pinged",
            }
        }
    }

    #[test]
    fn test_envelope_takes_type_tag_from_event() {
        let aggregate_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(aggregate_id, 4, 2, TestEvent::Pinged { count: 1 });

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.sequence, 4);
        assert_eq!(envelope.aggregate_version, 2);
        assert_eq!(envelope.event_type, "Pinged");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let id = Uuid::new_v4();
        let first = EventEnvelope::new(id, 1, 1, TestEvent::Pinged { count: 1 });
        let second = EventEnvelope::new(id, 2, 1, TestEvent::Pinged { count: 2 });

        assert_ne!(first.event_id, second.event_id);
        assert_eq!(first.event_id.get_version_num(), 7);
    }
}
