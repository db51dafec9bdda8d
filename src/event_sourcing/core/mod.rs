// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// This module contains GENERIC, reusable event sourcing infrastructure
// that works with ANY domain aggregate.
//
// Key Principles:
// - No domain-specific code (no Account, Order, etc.)
// - Generic over aggregate types
// - No I/O: storage lives in `store`, dispatch in `bus`
//
// ============================================================================

pub mod aggregate;
pub mod error;
pub mod event;
pub mod serializer;

// Re-export core types for convenience
pub use aggregate::{Aggregate, AggregateRoot};
pub use error::{EventSourcingError, Result, StorageError};
pub use event::{DomainEvent, EventEnvelope};
pub use serializer::{deserialize_aggregate, deserialize_event, serialize_aggregate, serialize_event};
