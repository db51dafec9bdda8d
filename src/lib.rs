// ============================================================================
// Event-Sourced Aggregate Store
// ============================================================================
//
// - event_sourcing: generic aggregate, store, snapshot and bus machinery
// - domain: aggregates built on top of it (Account)
// - metrics: prometheus counters for store and bus activity
// - config: environment-driven store settings
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod metrics;
pub mod utils;
