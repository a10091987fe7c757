//! Payledger Node Binary
//!
//! Wires configuration, logging and the PostgreSQL pool around the
//! settlement engine.

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payledger_engine::{EngineConfig, SettlementEngine};
use payledger_ledger::PgLedgerStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = EngineConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Payledger node");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    // Generate node ID if not provided
    let node_id = config
        .node_id
        .clone()
        .unwrap_or_else(|| format!("payledger-{}", uuid::Uuid::new_v4()));

    info!(node_id = %node_id, "Node ID assigned");

    let store = PgLedgerStore::connect(
        &config.database_url,
        config.max_connections,
        config.acquire_timeout,
    )
    .await
    .context("failed to connect to database")?
    .with_lock_timeout(config.lock_timeout);

    if config.run_migrations {
        store.migrate().await.context("failed to run migrations")?;
    }

    let engine = SettlementEngine::new(store.clone(), config.clone());

    info!(
        node_id = %node_id,
        max_connections = config.max_connections,
        posting_deadline_ms = config.posting_deadline.as_millis() as u64,
        lock_timeout_ms = config.lock_timeout.as_millis() as u64,
        operation_types = engine.catalog().len(),
        "Node ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown signal received");

    let metrics = engine.metrics().snapshot();
    info!(
        postings_recorded = metrics.postings_recorded,
        accounts_created = metrics.accounts_created,
        failures = metrics.failures,
        timeouts = metrics.timeouts,
        "Final metrics"
    );

    store.pool().close().await;

    info!(node_id = %node_id, "Node shutdown complete");
    Ok(())
}
