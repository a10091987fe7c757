//! Payledger Simulator
//!
//! Drives the settlement engine with random or scripted postings and checks
//! ledger invariants afterwards.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;
mod verify;

use controller::{RandomRun, SimulationController};
use payledger_engine::{EngineConfig, SettlementEngine};
use payledger_ledger::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use scenario::Scenario;

/// Payledger Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "payledger-simulator")]
#[command(about = "Payledger load and scenario simulator")]
struct Args {
    /// Number of accounts to create
    #[arg(short, long, default_value = "10")]
    accounts: usize,

    /// Number of random postings to fire
    #[arg(short, long, default_value = "1000")]
    postings: usize,

    /// Maximum postings in flight
    #[arg(short, long, default_value = "32")]
    concurrency: usize,

    /// Probability that a random posting is a credit
    #[arg(long, default_value = "0.3")]
    credit_ratio: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Built-in scenario name or path to a JSON scenario file
    #[arg(short, long)]
    scenario: Option<String>,

    /// PostgreSQL URL; the in-memory store is used when absent
    #[arg(long)]
    database_url: Option<String>,

    /// Per-posting deadline in milliseconds
    #[arg(long, default_value = "5000")]
    deadline_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if !(0.0..=1.0).contains(&args.credit_ratio) {
        return Err(anyhow::anyhow!("--credit-ratio must be within 0 and 1"));
    }

    info!("Starting Payledger Simulator");

    let mut config = EngineConfig::default();
    config.posting_deadline = Duration::from_millis(args.deadline_ms);
    config.lock_timeout = config.lock_timeout.min(config.posting_deadline);
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store: Arc<dyn LedgerStore> = match &args.database_url {
        Some(url) => {
            info!("Using PostgreSQL store");
            let store = PgLedgerStore::connect(url, config.max_connections, config.acquire_timeout)
                .await?
                .with_lock_timeout(config.lock_timeout);
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            info!("Using in-memory store");
            Arc::new(InMemoryLedgerStore::with_lock_timeout(config.lock_timeout))
        }
    };

    let engine = SettlementEngine::new(store, config);
    let mut controller = SimulationController::new(engine, args.seed);

    if let Some(name) = &args.scenario {
        let scenario = Scenario::load(name)?;
        controller.run_scenario(&scenario).await?;
    } else {
        let run = RandomRun {
            accounts: args.accounts,
            postings: args.postings,
            concurrency: args.concurrency,
            credit_ratio: args.credit_ratio,
        };
        let elapsed = controller.run(&run).await?;

        let metrics = controller.metrics();
        info!("Simulation complete");
        info!(
            "Posted: {} ({} debits, {} credits, {:.1}% credits)",
            metrics.posted(),
            metrics.debits_posted,
            metrics.credits_posted,
            metrics.credit_share() * 100.0
        );
        info!("Failed: {} ({} timeouts)", metrics.failed(), metrics.timed_out());
        for (code, count) in &metrics.failures {
            info!("  {}: {}", code, count);
        }
        info!("Throughput: {:.1}/s", metrics.throughput(elapsed));
        info!(
            "Latency p50/p99: {:?}/{:?}",
            metrics.latency_percentile(50),
            metrics.latency_percentile(99)
        );
    }

    let engine_metrics = controller.engine().metrics().snapshot();
    info!(
        debits_touched = engine_metrics.debits_touched,
        debits_settled = engine_metrics.debits_settled,
        credits_applied = engine_metrics.credits_applied,
        "Settlement activity"
    );

    let violations = controller.verify().await?;
    if !violations.is_empty() {
        error!("{} ledger invariant violations", violations.len());
        return Err(anyhow::anyhow!(
            "{} ledger invariant violations",
            violations.len()
        ));
    }

    info!("Ledger invariants hold");
    Ok(())
}
