// ============================================================================
// Account Domain - Business Logic for Account Aggregate
// ============================================================================
//
// This module contains ALL Account-specific code:
// - Value objects (Address, AccountStatus, SystemTag)
// - Events (AccountCreated, AddressUpdated, AccountApproved, etc.)
// - Commands (CreateAccount, UpdateAddress, etc.)
// - Errors (AccountError enum)
// - Aggregate (AccountState plus the Account business operations)
// - Command Handler (AccountCommandHandler)
//
// This is completely separate from the generic event sourcing infrastructure.
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
