use uuid::Uuid;

use super::value_objects::Address;

// ============================================================================
// Account Domain Commands
// ============================================================================

#[derive(Debug, Clone)]
pub enum AccountCommand {
    CreateAccount {
        account_id: Uuid,
        business_name: String,
    },
    AddSystemTag {
        account_id: Uuid,
        name: String,
        applies_to_expenses: bool,
        applies_to_timesheets: bool,
    },
    UpdateAddress {
        account_id: Uuid,
        address: Address,
    },
    ApproveAccount {
        account_id: Uuid,
        approved_by: String,
    },
    DeleteAccount {
        account_id: Uuid,
        reason: String,
    },
    ReinstateAccount {
        account_id: Uuid,
    },
}

impl AccountCommand {
    pub fn account_id(&self) -> Uuid {
        match self {
            AccountCommand::CreateAccount { account_id, .. }
            | AccountCommand::AddSystemTag { account_id, .. }
            | AccountCommand::UpdateAddress { account_id, .. }
            | AccountCommand::ApproveAccount { account_id, .. }
            | AccountCommand::DeleteAccount { account_id, .. }
            | AccountCommand::ReinstateAccount { account_id } => *account_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccountCommand::CreateAccount { .. } => "CreateAccount",
            AccountCommand::AddSystemTag { .. } => "AddSystemTag",
            AccountCommand::UpdateAddress { .. } => "UpdateAddress",
            AccountCommand::ApproveAccount { .. } => "ApproveAccount",
            AccountCommand::DeleteAccount { .. } => "DeleteAccount",
            AccountCommand::ReinstateAccount { .. } => "ReinstateAccount",
        }
    }
}
