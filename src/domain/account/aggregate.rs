use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, AggregateRoot, Result as StoreResult};
use super::commands::AccountCommand;
use super::errors::AccountError;
use super::events::*;
use super::value_objects::{
    required_text, Address, AccountStatus, SystemTag, DEFAULT_SYSTEM_TAGS,
    MAX_BUSINESS_NAME_LEN, MAX_TEXT_FIELD_LEN,
};

// ============================================================================
// Account Aggregate - Business Logic
// ============================================================================
//
// `AccountState` is the pure state machine folded from events. `Account` is
// the event-sourced root around it; business operations validate against the
// current state and then stage an event through `apply_change`.
//
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub business_name: String,
    pub account_number: u32,
    pub address: Address,
    pub status: AccountStatus,
    pub system_tags: Vec<SystemTag>,
}

impl AccountState {
    pub fn has_system_tag(&self, name: &str) -> bool {
        self.system_tags.iter().any(|tag| tag.name == name)
    }
}

impl Aggregate for AccountState {
    type Event = AccountEvent;

    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn apply(&mut self, event: &Self::Event) -> StoreResult<()> {
        match event {
            AccountEvent::Created(e) => {
                self.business_name = e.business_name.clone();
                self.account_number = e.account_number;
            }
            AccountEvent::SystemTagAdded(e) => {
                self.system_tags.push(SystemTag {
                    name: e.name.clone(),
                    applies_to_expenses: e.applies_to_expenses,
                    applies_to_timesheets: e.applies_to_timesheets,
                });
            }
            AccountEvent::AddressUpdated(e) => {
                self.address = e.address.clone();
            }
            AccountEvent::Approved(e) => {
                self.status = AccountStatus {
                    is_approved: true,
                    approved_by: Some(e.approved_by.clone()),
                    is_deleted: false,
                    deleted_reason: None,
                };
            }
            AccountEvent::Deleted(e) => {
                self.status.is_deleted = true;
                self.status.deleted_reason = Some(e.reason.clone());
            }
            AccountEvent::Reinstated(_) => {
                self.status.is_deleted = false;
                self.status.deleted_reason = None;
            }
        }
        Ok(())
    }
}

pub type Account = AggregateRoot<AccountState>;

impl AggregateRoot<AccountState> {
    /// New account with the default system tags, staged as one batch.
    pub fn create(
        account_id: Uuid,
        business_name: &str,
        account_number: u32,
    ) -> Result<Self, AccountError> {
        let business_name = required_text("business name", business_name, MAX_BUSINESS_NAME_LEN)?;

        let mut account = Self::new(account_id);
        account.apply_change(AccountEvent::Created(AccountCreated {
            account_id,
            business_name,
            account_number,
        }))?;

        for (name, applies_to_expenses, applies_to_timesheets) in DEFAULT_SYSTEM_TAGS {
            account.add_system_tag(name, applies_to_expenses, applies_to_timesheets)?;
        }

        Ok(account)
    }

    /// Whether this root has any history, durable or staged.
    pub fn exists(&self) -> bool {
        self.version() > 0
    }

    pub fn add_system_tag(
        &mut self,
        name: &str,
        applies_to_expenses: bool,
        applies_to_timesheets: bool,
    ) -> Result<(), AccountError> {
        let name = required_text("system tag name", name, MAX_TEXT_FIELD_LEN)?;
        if self.state().has_system_tag(&name) {
            return Err(AccountError::DuplicateSystemTag(name));
        }

        self.apply_change(AccountEvent::SystemTagAdded(SystemTagAdded {
            name,
            applies_to_expenses,
            applies_to_timesheets,
        }))?;
        Ok(())
    }

    pub fn change_address(&mut self, address: Address) -> Result<(), AccountError> {
        address.validate()?;
        self.apply_change(AccountEvent::AddressUpdated(AddressUpdated { address }))?;
        Ok(())
    }

    pub fn approve(&mut self, approved_by: &str) -> Result<(), AccountError> {
        let approved_by = required_text("approved by", approved_by, MAX_TEXT_FIELD_LEN)?;
        if self.state().status.is_approved {
            return Err(AccountError::AlreadyApproved);
        }

        self.apply_change(AccountEvent::Approved(AccountApproved { approved_by }))?;
        Ok(())
    }

    pub fn delete(&mut self, reason: &str) -> Result<(), AccountError> {
        let reason = required_text("deletion reason", reason, MAX_TEXT_FIELD_LEN)?;
        self.apply_change(AccountEvent::Deleted(AccountDeleted { reason }))?;
        Ok(())
    }

    pub fn reinstate(&mut self) -> Result<(), AccountError> {
        if !self.state().status.is_deleted {
            return Err(AccountError::NotDeleted);
        }
        self.apply_change(AccountEvent::Reinstated(AccountReinstated {}))?;
        Ok(())
    }

    /// Route a command against an existing account. Creation goes through
    /// `Account::create` instead.
    pub fn handle_command(&mut self, command: &AccountCommand) -> Result<(), AccountError> {
        match command {
            AccountCommand::CreateAccount { account_id, .. } => {
                Err(AccountError::AlreadyExists(*account_id))
            }
            AccountCommand::AddSystemTag {
                name,
                applies_to_expenses,
                applies_to_timesheets,
                ..
            } => self.add_system_tag(name, *applies_to_expenses, *applies_to_timesheets),
            AccountCommand::UpdateAddress { address, .. } => self.change_address(address.clone()),
            AccountCommand::ApproveAccount { approved_by, .. } => self.approve(approved_by),
            AccountCommand::DeleteAccount { reason, .. } => self.delete(reason),
            AccountCommand::ReinstateAccount { .. } => self.reinstate(),
        }
    }
}
