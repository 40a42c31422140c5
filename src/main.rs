//! feed-sync - Two-phase supplier-to-marketplace inventory feed synchronization
//!
//! This is the main entry point for the feed-sync application.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use feed_sync::config::Config;
use feed_sync::database::{ProductStore, SqliteProductStore};
use feed_sync::engine::{RunMode, SyncOrchestrator};
use feed_sync::marketplace::SpApiClient;
use feed_sync::models::ProductRecord;
use feed_sync::providers::ProviderFactory;
use feed_sync::sync::SyncScheduler;
use feed_sync::telemetry::init_tracing;

/// feed-sync - Two-phase supplier-to-marketplace inventory feed synchronization
#[derive(Parser, Debug)]
#[command(name = "feed-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "FEED_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one store once
    Run {
        /// Store id from the configuration
        #[arg(short, long)]
        store: String,

        /// full, fetch-only or publish-only
        #[arg(short, long, default_value = "full")]
        mode: RunMode,
    },
    /// Run every enabled store on its interval until interrupted
    Daemon,
    /// Load catalog rows for a store from a CSV file
    Import {
        /// Store id the rows belong to
        #[arg(short, long)]
        store: String,

        /// CSV with a `sku` column and optional `secondary_sku`, `marketplace_id`
        file: PathBuf,
    },
}

/// One catalog CSV row
#[derive(Debug, Deserialize)]
struct CatalogRow {
    sku: String,
    #[serde(default)]
    secondary_sku: Option<String>,
    #[serde(default)]
    marketplace_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting feed-sync");

    // Initialize database
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let products = Arc::new(SqliteProductStore::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    match args.command {
        Command::Import { store, file } => import_catalog(products.as_ref(), &store, &file).await,
        Command::Run { store, mode } => {
            let orchestrator = Arc::new(build_orchestrator(&config, products).await?);

            // An interrupt cancels the run; it still stops at a safe point.
            let interrupt = {
                let orchestrator = Arc::clone(&orchestrator);
                let store = store.clone();
                tokio::spawn(async move {
                    shutdown_signal().await;
                    orchestrator.cancel(&store);
                })
            };

            let result = orchestrator.run_store(&store, mode).await;
            interrupt.abort();

            let summary = result?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Daemon => {
            let orchestrator = Arc::new(build_orchestrator(&config, products).await?);
            let jobs = orchestrator.jobs();
            if jobs.is_empty() {
                warn!("No enabled stores configured");
            }

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            let scheduler = SyncScheduler::new(config.scheduler.clone(), jobs, shutdown_rx);
            let handle = tokio::spawn(scheduler.run());

            shutdown_signal().await;
            orchestrator.cancel_all();
            let _ = shutdown_tx.send(());

            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task failed");
            }

            info!("feed-sync shutdown complete");
            Ok(())
        }
    }
}

/// Wire providers, marketplace client and product store together
async fn build_orchestrator(
    config: &Config,
    products: Arc<SqliteProductStore>,
) -> anyhow::Result<SyncOrchestrator> {
    let factory = Arc::new(ProviderFactory::with_builtin_providers().await);
    info!(providers = ?factory.registered().await, "Providers registered");

    let marketplace = Arc::new(SpApiClient::new(&config.marketplace, &config.http)?);

    Ok(SyncOrchestrator::new(config, factory, products, marketplace))
}

/// Insert or replace catalog rows for a store
async fn import_catalog(
    products: &SqliteProductStore,
    store_id: &str,
    file: &PathBuf,
) -> anyhow::Result<()> {
    let mut reader = csv::Reader::from_path(file)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let row: CatalogRow = row?;
        let mut record = ProductRecord::new(row.sku, store_id);
        record.secondary_sku = row.secondary_sku.filter(|s| !s.is_empty());
        record.marketplace_id = row.marketplace_id.filter(|s| !s.is_empty());
        records.push(record);
    }

    let inserted = products.insert_products(&records).await?;
    info!(store = store_id, file = %file.display(), rows = inserted, "Catalog imported");
    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
