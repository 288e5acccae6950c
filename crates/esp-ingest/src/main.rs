//! ESP Ingest - micro-batch event ingestion

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use esp_common::logging::{init_logging, LogConfig, LogLevel};
use esp_ingest::checkpoint::CheckpointStore;
use esp_ingest::config::IngestConfig;
use esp_ingest::orchestrator::BatchOrchestrator;
use esp_ingest::signal::cancel_on_shutdown;
use esp_ingest::sink::postgres::create_pool;
use esp_ingest::sink::{EventSink, MemoryEventSink, PgEventSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "esp-ingest")]
#[command(author, version, about = "Micro-batch ingestion of event files into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Landing directory (overrides ESP_LANDING_DIR)
    #[arg(long, global = true, env = "ESP_LANDING_DIR")]
    landing_dir: Option<PathBuf>,

    /// Quarantine directory (overrides ESP_ERROR_DIR)
    #[arg(long, global = true, env = "ESP_ERROR_DIR")]
    error_dir: Option<PathBuf>,

    /// Checkpoint directory (overrides ESP_CHECKPOINT_DIR)
    #[arg(long, global = true, env = "ESP_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Write to an in-memory sink instead of PostgreSQL
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduled micro-batch loop until SIGINT/SIGTERM
    Run,

    /// Run a single cycle and exit
    Once,

    /// Print the committed checkpoint ledger
    Checkpoints,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("esp-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env();
    if let Some(dir) = cli.landing_dir {
        config.paths.landing_dir = dir;
    }
    if let Some(dir) = cli.error_dir {
        config.paths.error_dir = dir;
    }
    if let Some(dir) = cli.checkpoint_dir {
        config.paths.checkpoint_dir = dir;
    }
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Command::Checkpoints => print_checkpoints(&config),
        Command::Once => {
            let mut orchestrator = build(&config, cli.dry_run).await?;
            let outcome = orchestrator.run_cycle().await?;
            if outcome.report().is_none() {
                info!("Nothing to ingest");
            }
            Ok(())
        },
        Command::Run => {
            let mut orchestrator = build(&config, cli.dry_run).await?;
            let shutdown = CancellationToken::new();
            let signals = cancel_on_shutdown(shutdown.clone());

            orchestrator.run(shutdown.clone(), None).await?;

            shutdown.cancel();
            signals.await.ok();
            info!(
                committed_units = orchestrator.checkpoint().len(),
                last_sequence = ?orchestrator.checkpoint().last_sequence(),
                "Shutdown complete"
            );
            Ok(())
        },
    }
}

/// Connect the sink, wait for it, and assemble the orchestrator
async fn build(config: &IngestConfig, dry_run: bool) -> Result<BatchOrchestrator> {
    let postgres = if dry_run {
        info!("Dry run: events are kept in memory");
        None
    } else {
        let pool = create_pool(&config.database).context("Failed to create database pool")?;
        Some(Arc::new(PgEventSink::new(pool)))
    };
    let sink: Arc<dyn EventSink> = match &postgres {
        Some(pg) => pg.clone(),
        None => Arc::new(MemoryEventSink::new()),
    };

    let orchestrator = BatchOrchestrator::new(config, sink)?;
    orchestrator
        .wait_for_sink(
            config.retry.startup_probe_attempts,
            Duration::from_secs(config.retry.startup_probe_delay_secs),
        )
        .await?;

    if let Some(pg) = postgres {
        pg.run_migrations().await.context("Failed to run migrations")?;
    }

    Ok(orchestrator)
}

fn print_checkpoints(config: &IngestConfig) -> Result<()> {
    let store = CheckpointStore::open_read_only(&config.paths.checkpoint_dir).with_context(|| {
        format!(
            "Failed to open checkpoint ledger in {}",
            config.paths.checkpoint_dir.display()
        )
    })?;

    println!("Ledger: {}", store.ledger_path().display());
    println!("Batches: {}  Work units: {}", store.entries().len(), store.len());
    for entry in store.entries() {
        println!(
            "#{:<6} {}  run {}  {} file(s)",
            entry.sequence,
            entry.committed_at.format("%Y-%m-%d %H:%M:%S"),
            entry.run_id,
            entry.units.len()
        );
        for unit in &entry.units {
            println!("         {}  {}  {} bytes", unit.fingerprint.short(), unit.path, unit.size);
        }
    }
    Ok(())
}
