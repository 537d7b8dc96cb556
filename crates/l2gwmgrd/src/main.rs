//! l2gwmgrd - L2 Gateway Manager Daemon
//!
//! Entry point for the l2gwmgrd daemon and its offline validation mode.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use l2gwmgrd::{
    Collaborators, HaTopologyIndex, L2GwManager, L2gwConfig, MemoryDataStore, ReconciliationEngine,
    StoreDump, DEFAULT_CONFIG_PATH,
};

/// L2 gateway manager
#[derive(Parser, Debug)]
#[command(name = "l2gwmgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the manager and run until interrupted (default)
    Run,
    /// Reconcile a JSON state dump and write the report
    Validate {
        /// State dump with `config`, `operational` and `ha` sections
        #[arg(short = 'd', long)]
        dump: PathBuf,

        /// Report file; overrides `[validation] report_path`
        #[arg(short = 'r', long)]
        report: Option<PathBuf>,
    },
}

/// Initializes tracing/logging subsystem
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to set tracing subscriber: {}", e))
}

/// Standalone mode has no event feed of its own: topology listeners embedding
/// the library call the `L2GwManager::on_*` handlers, so here the manager only
/// drains whatever they submitted before shutdown.
async fn run(config: &L2gwConfig) -> anyhow::Result<()> {
    let store = Arc::new(MemoryDataStore::new());
    let manager = L2GwManager::new(config, Collaborators::in_memory(store));
    info!(
        owner_only = config.elan.owner_only_jobs,
        max_retries = config.coordinator.default_max_retries,
        "l2gwmgrd initialization complete"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, draining jobs");
    manager.wait_idle().await;

    let stats = manager.coordinator().stats();
    info!(
        executed = stats.executed,
        completed = stats.completed,
        failed = stats.failed,
        skipped = stats.skipped,
        "l2gwmgrd stopped"
    );
    Ok(())
}

async fn validate(config: &L2gwConfig, dump: PathBuf, report: Option<PathBuf>) -> anyhow::Result<()> {
    let state = StoreDump::load(&dump)
        .with_context(|| format!("failed to load state dump {}", dump.display()))?;

    let ha = Arc::new(HaTopologyIndex::new());
    for group in &state.ha {
        for child in &group.children {
            if let Err(e) = ha.add_child(&group.parent, child) {
                warn!(parent = %group.parent, %child, error = %e, "ignoring HA relationship");
            }
        }
    }

    let store = Arc::new(MemoryDataStore::from_dump(&state));
    let devices: Vec<_> = state.devices().into_iter().collect();
    let engine = ReconciliationEngine::new(store, ha).with_display_limit(config.validation.display_limit);
    let result = engine.run(&devices).await;

    match report.or_else(|| config.validation.report_path.clone()) {
        Some(path) => {
            result
                .write_to(&path)
                .with_context(|| format!("failed to write report {}", path.display()))?;
            info!(path = %path.display(), clean = result.is_clean(), "validation report written");
        }
        None => print!("{}", result),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("--- Starting l2gwmgrd ---");

    let config = L2gwConfig::load_or_default(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Validate { dump, report } => validate(&config, dump, report).await,
    }
}
