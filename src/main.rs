use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use aggregate_store::config::StoreConfig;
use aggregate_store::domain::account::{
    event_types, Account, AccountCommand, AccountCommandHandler, AccountEvent, AccountState,
    Address,
};
use aggregate_store::event_sourcing::{
    EventBus, EventHandler, EventLog, EventStore, InMemoryStore, PostgresStore,
    SnapshotRepository, SnapshotStorage,
};
use aggregate_store::metrics::Metrics;

/// Read-side stand-in: logs every account event it receives.
#[derive(Default)]
struct AccountActivityLog {
    received: AtomicUsize,
}

impl EventHandler<AccountEvent> for AccountActivityLog {
    fn handle(&self, event: &AccountEvent) -> anyhow::Result<()> {
        self.received.fetch_add(1, Ordering::Relaxed);

        match event {
            AccountEvent::Created(e) => tracing::info!(
                account_id = %e.account_id,
                business_name = %e.business_name,
                account_number = e.account_number,
                "📒 Account created"
            ),
            AccountEvent::SystemTagAdded(e) => tracing::debug!(tag = %e.name, "Tag added"),
            AccountEvent::AddressUpdated(e) => tracing::debug!(
                line1 = e.address.line1.as_deref().unwrap_or_default(),
                "Address updated"
            ),
            AccountEvent::Approved(e) => tracing::info!(approved_by = %e.approved_by, "📒 Account approved"),
            AccountEvent::Deleted(e) => tracing::info!(reason = %e.reason, "📒 Account deleted"),
            AccountEvent::Reinstated(_) => tracing::info!("📒 Account reinstated"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,aggregate_store=debug"))
        )
        .init();

    tracing::info!("🚀 Starting event-sourced aggregate store demo");

    // === 1. Configuration and backend ===
    let config = StoreConfig::from_env()?;
    tracing::info!(
        backend = config.backend_name(),
        snapshot_interval = config.snapshot_interval,
        snapshots_enabled = config.snapshots_enabled,
        require_subscribers = config.require_subscribers,
        "Loaded configuration"
    );

    let (log, snapshot_storage): (Arc<dyn EventLog>, Arc<dyn SnapshotStorage>) =
        match &config.database_url {
            Some(url) => {
                let postgres = Arc::new(PostgresStore::connect(url, config.max_connections).await?);
                postgres.migrate().await?;
                (postgres.clone(), postgres)
            }
            None => {
                let memory = Arc::new(InMemoryStore::new());
                (memory.clone(), memory)
            }
        };

    // === 2. Metrics, bus and subscriptions ===
    let metrics = Arc::new(Metrics::new()?);

    let bus = EventBus::<AccountEvent>::default();
    let activity = Arc::new(AccountActivityLog::default());
    for event_type in event_types::ALL {
        bus.subscribe(event_type, activity.clone());
    }

    // === 3. Event store and command handler ===
    let mut store = EventStore::<AccountState>::new(log)
        .with_event_bus(bus)
        .require_subscribers(config.require_subscribers)
        .with_metrics(metrics.clone());
    if config.snapshots_enabled {
        store = store.with_snapshots(
            SnapshotRepository::new(snapshot_storage).with_interval(config.snapshot_interval),
        );
    }
    let handler = AccountCommandHandler::new(Arc::new(store));

    // === 4. Account lifecycle ===
    let account_id = Uuid::now_v7();
    handler
        .handle(AccountCommand::CreateAccount {
            account_id,
            business_name: "ThoughtDesign".to_string(),
        })
        .await?;

    // 60 single-event saves cross six snapshot boundaries at the default interval
    for i in 0..60 {
        handler
            .handle(AccountCommand::UpdateAddress {
                account_id,
                address: Address {
                    line1: Some(format!("Test {i}")),
                    country: Some("Australia".to_string()),
                    ..Address::default()
                },
            })
            .await?;
    }

    handler
        .handle(AccountCommand::ApproveAccount {
            account_id,
            approved_by: "Omar Besiso".to_string(),
        })
        .await?;
    handler
        .handle(AccountCommand::DeleteAccount {
            account_id,
            reason: "Testing".to_string(),
        })
        .await?;
    let account = handler
        .handle(AccountCommand::ReinstateAccount { account_id })
        .await?;

    // === 5. Rebuild the profile from a filtered stream ===
    let profile_events = handler
        .event_store()
        .events_of_type(account_id, &event_types::PROFILE)
        .await?;
    let profile_event_count = profile_events.len();
    let mut profile = Account::new(account_id);
    profile.replay(profile_events)?;

    // === 6. Summary ===
    let state = account.state();
    println!();
    println!("Account {account_id}");
    println!("  business name:   {}", state.business_name);
    println!("  account number:  {}", state.account_number);
    println!("  address line 1:  {}", state.address.line1.as_deref().unwrap_or("-"));
    println!("  approved by:     {}", state.status.approved_by.as_deref().unwrap_or("-"));
    println!("  deleted:         {}", state.status.is_deleted);
    println!("  system tags:     {}", state.system_tags.len());
    println!("  version:         {}", account.version());
    println!("  last sequence:   {}", account.last_sequence());
    println!(
        "  snapshots:       {}",
        metrics.snapshots_written.with_label_values(&["Account"]).get()
    );
    println!("  events received: {}", activity.received.load(Ordering::Relaxed));
    println!(
        "  profile replay:  {} events, address line 1 {}",
        profile_event_count,
        profile.state().address.line1.as_deref().unwrap_or("-")
    );
    println!();
    println!("{}", metrics.render()?);

    tracing::info!("🎉 Demo complete!");
    Ok(())
}
