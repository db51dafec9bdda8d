use uuid::Uuid;

use crate::event_sourcing::core::EventSourcingError;
use crate::utils::retry::IsTransient;

// ============================================================================
// Account Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("{0} cannot be empty")]
    Required(&'static str),

    #[error("{field} is {length} characters long, the limit is {max}")]
    FieldTooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },

    #[error("System tag '{0}' already exists on this account")]
    DuplicateSystemTag(String),

    #[error("Account is already approved")]
    AlreadyApproved,

    #[error("Account must be deleted to be reinstated")]
    NotDeleted,

    #[error("Account not found: {0}")]
    NotFound(Uuid),

    #[error("Account already exists: {0}")]
    AlreadyExists(Uuid),

    #[error(transparent)]
    EventSourcing(#[from] EventSourcingError),
}

impl IsTransient for AccountError {
    fn is_transient(&self) -> bool {
        matches!(self, AccountError::EventSourcing(e) if e.is_transient())
    }
}
