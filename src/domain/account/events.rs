use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_sourcing::core::DomainEvent;
use super::value_objects::Address;

// ============================================================================
// Account Domain Events
// ============================================================================

/// Stable type tags, as written to the event log.
pub mod event_types {
    pub const ACCOUNT_CREATED: &str = "AccountCreated";
    pub const SYSTEM_TAG_ADDED: &str = "SystemTagAdded";
    pub const ADDRESS_UPDATED: &str = "AddressUpdated";
    pub const ACCOUNT_APPROVED: &str = "AccountApproved";
    pub const ACCOUNT_DELETED: &str = "AccountDeleted";
    pub const ACCOUNT_REINSTATED: &str = "AccountReinstated";

    pub const ALL: [&str; 6] = [
        ACCOUNT_CREATED,
        SYSTEM_TAG_ADDED,
        ADDRESS_UPDATED,
        ACCOUNT_APPROVED,
        ACCOUNT_DELETED,
        ACCOUNT_REINSTATED,
    ];

    /// Events that describe the account itself rather than its lifecycle
    /// status. Replaying only these rebuilds a reinstated account's profile.
    pub const PROFILE: [&str; 3] = [ACCOUNT_CREATED, SYSTEM_TAG_ADDED, ADDRESS_UPDATED];
}

/// Union type for all account events.
///
/// Serde tags must match `event_type()`; the log stores both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AccountEvent {
    #[serde(rename = "AccountCreated")]
    Created(AccountCreated),
    #[serde(rename = "SystemTagAdded")]
    SystemTagAdded(SystemTagAdded),
    #[serde(rename = "AddressUpdated")]
    AddressUpdated(AddressUpdated),
    #[serde(rename = "AccountApproved")]
    Approved(AccountApproved),
    #[serde(rename = "AccountDeleted")]
    Deleted(AccountDeleted),
    #[serde(rename = "AccountReinstated")]
    Reinstated(AccountReinstated),
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Created(_) => event_types::ACCOUNT_CREATED,
            AccountEvent::SystemTagAdded(_) => event_types::SYSTEM_TAG_ADDED,
            AccountEvent::AddressUpdated(_) => event_types::ADDRESS_UPDATED,
            AccountEvent::Approved(_) => event_types::ACCOUNT_APPROVED,
            AccountEvent::Deleted(_) => event_types::ACCOUNT_DELETED,
            AccountEvent::Reinstated(_) => event_types::ACCOUNT_REINSTATED,
        }
    }
}

// Individual event types

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCreated {
    pub account_id: Uuid,
    pub business_name: String,
    pub account_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemTagAdded {
    pub name: String,
    pub applies_to_expenses: bool,
    pub applies_to_timesheets: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressUpdated {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountApproved {
    pub approved_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountDeleted {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountReinstated {}
