use std::sync::Arc;

use mirror_relay::admin::AdminHandler;
use mirror_relay::config::MirrorConfig;
use mirror_relay::ledger::DeliveryLedger;
use mirror_relay::pipeline::{MirrorCoordinator, RuleSet};
use mirror_relay::publish::TelegramPublisher;
use mirror_relay::routing::RoutingTable;
use mirror_relay::state::SharedConfig;
use mirror_relay::store::{LibSqlStore, Store};
use mirror_relay::telegram::BotApi;
use mirror_relay::transport::UpdateDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = MirrorConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export BOT_TOKEN=123456:ABC-...");
        std::process::exit(1);
    });

    eprintln!("📡 Mirror Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Admins: {}", config.admin_ids.len());
    eprintln!(
        "   Queue: {} deep, {} concurrent publishes\n",
        config.queue_depth, config.max_concurrent_publishes
    );

    // ── Database ─────────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {e}",
                    config.db_path.display()
                );
                std::process::exit(1);
            }),
    );

    // ── Configuration state ──────────────────────────────────────────────
    let edges = store.list_mappings().await?;
    let rules = store.list_rules().await?;
    tracing::info!(
        mappings = edges.len(),
        rules = rules.len(),
        "Loaded configuration"
    );
    let shared = Arc::new(SharedConfig::new(
        RoutingTable::from_edges(edges),
        RuleSet::compile(rules, 1),
    ));

    // ── Pipeline ─────────────────────────────────────────────────────────
    let api = Arc::new(BotApi::new(config.bot_token.clone()));
    let publisher = Arc::new(TelegramPublisher::new(Arc::clone(&api)));
    let ledger: Arc<dyn DeliveryLedger> = store.clone();
    let coordinator = Arc::new(MirrorCoordinator::new(
        Arc::clone(&shared),
        publisher,
        ledger,
        config.max_concurrent_publishes,
        config.retry.clone(),
    ));

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(config.queue_depth);
    let coordinator_task = tokio::spawn(Arc::clone(&coordinator).run(events_rx));

    // ── Transport ────────────────────────────────────────────────────────
    let admin = Arc::new(AdminHandler::new(
        Arc::clone(&api),
        store.clone() as Arc<dyn Store>,
        Arc::clone(&shared),
        config.admin_ids.clone(),
    ));
    let dispatcher = UpdateDispatcher::new(api, admin, events_tx, config.poll_timeout_secs);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown_tx.send(true).ok();
        }
    });

    // The dispatcher owns the event sender; when it returns the channel
    // closes and the coordinator drains its in-flight posts.
    dispatcher.run(shutdown_rx).await;
    coordinator_task.await?;

    Ok(())
}
