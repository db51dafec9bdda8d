use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::event_sourcing::store::EventStore;
use crate::utils::retry::{retry_on_transient, RetryConfig};

use super::aggregate::{Account, AccountState};
use super::commands::AccountCommand;
use super::errors::AccountError;

// ============================================================================
// Account Command Handler
// ============================================================================
//
// Orchestrates: Command → Load → Account operation → Save
//
// A save rejected by the version check reruns the whole cycle against a
// freshly loaded account. Business rule violations are returned as-is.
//
// ============================================================================

pub const FIRST_ACCOUNT_NUMBER: u32 = 1000;

/// Hands out account numbers for new accounts, in increasing order.
#[derive(Debug)]
pub struct AccountNumberGenerator {
    next: AtomicU32,
}

impl AccountNumberGenerator {
    pub fn starting_at(first: u32) -> Self {
        Self { next: AtomicU32::new(first) }
    }

    pub fn next_number(&self) -> u32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for AccountNumberGenerator {
    fn default() -> Self {
        Self::starting_at(FIRST_ACCOUNT_NUMBER)
    }
}

pub struct AccountCommandHandler {
    event_store: Arc<EventStore<AccountState>>,
    account_numbers: AccountNumberGenerator,
    retry: RetryConfig,
}

impl AccountCommandHandler {
    pub fn new(event_store: Arc<EventStore<AccountState>>) -> Self {
        Self {
            event_store,
            account_numbers: AccountNumberGenerator::default(),
            retry: RetryConfig::for_conflicts(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_account_numbers(mut self, account_numbers: AccountNumberGenerator) -> Self {
        self.account_numbers = account_numbers;
        self
    }

    pub fn event_store(&self) -> &Arc<EventStore<AccountState>> {
        &self.event_store
    }

    /// Handle a command and persist the resulting events. Returns the account
    /// as saved.
    ///
    /// A new account's number is drawn once, so every retry of the same
    /// create reuses it.
    pub async fn handle(&self, command: AccountCommand) -> Result<Account, AccountError> {
        let command = &command;
        let account_number = matches!(command, AccountCommand::CreateAccount { .. })
            .then(|| self.account_numbers.next_number());

        retry_on_transient(self.retry.clone(), move |attempt| {
            self.execute(command, account_number, attempt)
        })
        .await
        .into_result()
    }

    async fn execute(
        &self,
        command: &AccountCommand,
        account_number: Option<u32>,
        attempt: u32,
    ) -> Result<Account, AccountError> {
        let account_id = command.account_id();
        let mut account = self.event_store.load(account_id).await?;

        match command {
            AccountCommand::CreateAccount { business_name, .. } => {
                if account.exists() {
                    return Err(AccountError::AlreadyExists(account_id));
                }
                let account_number = account_number.unwrap_or_default();
                account = Account::create(account_id, business_name, account_number)?;
            }
            _ => {
                if !account.exists() {
                    return Err(AccountError::NotFound(account_id));
                }
                account.handle_command(command)?;
            }
        }

        self.event_store.save(&mut account).await?;

        tracing::debug!(
            aggregate_id = %account_id,
            command = command.name(),
            version = account.version(),
            attempt = attempt,
            "Command handled"
        );

        Ok(account)
    }
}
