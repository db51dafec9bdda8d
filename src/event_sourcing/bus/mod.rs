// ============================================================================
// Event Sourcing Bus - Dispatch of Committed Events
// ============================================================================

pub mod event_bus;

pub use event_bus::{EventBus, EventHandler, SubscriptionRegistry};
