//! GiftScan service entry point.
//!
//! Loads configuration, initialises structured logging, seeds the
//! catalog, builds the source registry and escrow stack, then runs the
//! scan scheduler and deposit watcher until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use giftscan::api::{spawn_api, ApiState};
use giftscan::cache::TtlCache;
use giftscan::config::AppConfig;
use giftscan::engine::scanner::Scanner;
use giftscan::engine::stats::MarketStatsService;
use giftscan::engine::valuation::ValuationEngine;
use giftscan::escrow::ledger::HttpLedgerClient;
use giftscan::escrow::watcher::DepositWatcher;
use giftscan::escrow::{EscrowService, LoggingSettlement};
use giftscan::markets::registry::SourceRegistry;
use giftscan::notify::{NoopNotifier, Notifier, TelegramNotifier};
use giftscan::scheduler::ScanScheduler;
use giftscan::storage::Storage;
use giftscan::types::CatalogItem;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    info!(
        service = %cfg.service.name,
        scan_interval_secs = cfg.scanner.interval_secs,
        currency = %cfg.service.currency,
        "GiftScan starting up"
    );

    // -- Storage and catalog ----------------------------------------------

    let storage = Arc::new(
        Storage::connect(&cfg.service.database_url)
            .await
            .context("Failed to open database")?,
    );
    let catalog: Vec<CatalogItem> = cfg
        .catalog
        .iter()
        .map(|entry| CatalogItem {
            slug: entry.slug.clone(),
            name: entry.name.clone(),
            image_url: entry.image_url.clone(),
            total_supply: entry.total_supply,
        })
        .collect();
    storage
        .seed_catalog(&catalog)
        .await
        .context("Failed to seed catalog")?;
    info!(items = catalog.len(), "Catalog seeded");

    // -- Sources, engine, cache -------------------------------------------

    let registry = Arc::new(SourceRegistry::from_config(&cfg.sources)?);
    if registry.is_empty() {
        warn!("No marketplace sources enabled, scans will be empty");
    }
    let scanner = Arc::new(Scanner::new(registry.clone(), &cfg.scanner));
    let valuation = Arc::new(ValuationEngine::from_config(&cfg.valuation)?);
    let cache = Arc::new(TtlCache::new(Duration::from_secs(cfg.cache.ttl_secs)));

    // -- Notifications -----------------------------------------------------

    let notifier: Arc<dyn Notifier> = match telegram_credentials(&cfg) {
        Some((token, chat_id)) => {
            info!("Telegram alerts enabled");
            Arc::new(TelegramNotifier::new(token, chat_id)?)
        }
        None => {
            info!("Telegram alerts not configured");
            Arc::new(NoopNotifier)
        }
    };

    // -- Escrow ------------------------------------------------------------

    let ledger_key = cfg
        .ledger
        .api_key_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    let ledger = Arc::new(HttpLedgerClient::new(cfg.ledger.base_url.clone(), ledger_key)?);
    let escrow = Arc::new(EscrowService::new(
        storage.clone(),
        ledger,
        Arc::new(LoggingSettlement),
        notifier.clone(),
        cfg.escrow.deposit_expiry_secs,
    ));

    // -- Background tasks --------------------------------------------------

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let watcher = DepositWatcher::new(
        escrow.clone(),
        storage.clone(),
        cfg.escrow.poll_interval_secs,
        cfg.escrow.max_backoff_secs,
    );
    tokio::spawn(watcher.run(shutdown_rx.clone()));

    if cfg.api.enabled {
        let stats = Arc::new(MarketStatsService::new(
            storage.clone(),
            valuation.clone(),
            registry.len(),
        ));
        let state = Arc::new(ApiState {
            storage: storage.clone(),
            registry: registry.clone(),
            valuation: valuation.clone(),
            stats,
            escrow: escrow.clone(),
            cache: cache.clone(),
            spread_threshold_pct: cfg.arbitrage.spread_threshold_pct,
        });
        spawn_api(state, cfg.api.port)?;
    }

    let scheduler = Arc::new(ScanScheduler::new(
        scanner,
        storage,
        cache,
        registry,
        valuation,
        notifier,
        cfg.scanner.interval_secs,
        cfg.arbitrage.spread_threshold_pct,
    ));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    info!("Entering main loop. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received.");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    info!("GiftScan shut down cleanly.");
    Ok(())
}

fn telegram_credentials(cfg: &AppConfig) -> Option<(String, String)> {
    let token_env = cfg.alerts.telegram_bot_token_env.as_deref()?;
    let chat_env = cfg.alerts.telegram_chat_id_env.as_deref()?;
    let token = std::env::var(token_env).ok()?;
    let chat_id = std::env::var(chat_env).ok()?;
    Some((token, chat_id))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("giftscan=info"));

    let json_logging = std::env::var("GIFTSCAN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
