use uuid::Uuid;

// ============================================================================
// Event Sourcing Errors
// ============================================================================
//
// Every failure the generic infrastructure can report. Domain crates wrap
// this type instead of inventing their own storage/concurrency variants.
//
// ============================================================================

/// Failures raised by the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EventSourcingError {
    /// Version mismatch at save. Recoverable by reload-and-retry.
    #[error(
        "concurrency conflict on {aggregate_type} {aggregate_id}: aggregate is at version {attempted}, \
         durable log is at version {persisted}"
    )]
    ConcurrencyConflict {
        aggregate_type: &'static str,
        aggregate_id: Uuid,
        attempted: i64,
        persisted: i64,
    },

    /// Save or snapshot of an aggregate whose staged events do not match
    /// what the operation needs: nothing to commit, or changes not yet durable.
    #[error("{aggregate_type} {aggregate_id}: {reason}")]
    InvalidBatch {
        aggregate_type: &'static str,
        aggregate_id: Uuid,
        reason: &'static str,
    },

    #[error("{aggregate_type} has no state transition for event '{event_type}'")]
    UnknownEventVariant {
        aggregate_type: &'static str,
        event_type: String,
    },

    #[error("failed to deserialize {context}: {reason}")]
    Deserialization { context: String, reason: String },

    #[error("failed to serialize {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no handler is registered for event '{event_type}'")]
    NoSubscriber { event_type: String },

    #[error("handler {handler} failed on event '{event_type}': {source}")]
    Handler {
        handler: &'static str,
        event_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EventSourcingError {
    pub fn deserialization(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Deserialization {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Whether reloading the aggregate and repeating the operation can succeed.
    pub fn is_transient(&self) -> bool {
        self.is_concurrency_conflict()
    }
}

pub type Result<T, E = EventSourcingError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_both_versions() {
        let err = EventSourcingError::ConcurrencyConflict {
            aggregate_type: "Account",
            aggregate_id: Uuid::nil(),
            attempted: 3,
            persisted: 3,
        };

        let message = err.to_string();
        assert!(message.contains("version 3"));
        assert!(err.is_concurrency_conflict());
        assert!(err.is_transient());
    }

    #[test]
    fn test_storage_error_is_transparent() {
        let err: EventSourcingError = StorageError::Unavailable("disk full".into()).into();
        assert_eq!(err.to_string(), "storage backend unavailable: disk full");
        assert!(!err.is_concurrency_conflict());
        assert!(!err.is_transient());
    }
}
