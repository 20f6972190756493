//! Harvest-Frontier main entry point
//!
//! This is the command-line interface for the Harvest-Frontier crawl coordinator.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use harvest_frontier::checkpoint::{
    CheckpointManager, CheckpointStore, DatabaseCheckpointStore, FileCheckpointStore,
};
use harvest_frontier::config::{load_config_with_hash, Config};
use harvest_frontier::crawler::{Collaborators, Coordinator, RunOptions, StopReason};
use harvest_frontier::frontier::{DeadLetterStore, JobQueue};
use harvest_frontier::output::{print_metrics, JsonLinesSink};
use harvest_frontier::robots::AllowAll;
use harvest_frontier::state::JobId;
use harvest_frontier::storage::{lock, open_storage, shared, SharedStorage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Harvest-Frontier: a polite, crash-safe crawl coordinator
///
/// Harvest-Frontier deduplicates URLs, paces requests per domain, retries
/// transient failures, dead-letters the rest, and checkpoints its frontier
/// so an interrupted crawl resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "harvest-frontier")]
#[command(version = "1.0.0")]
#[command(about = "A polite, crash-safe crawl coordinator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl until the frontier drains or Ctrl-C is pressed (resumes by default)
    Run {
        /// Discard the checkpoint and start a new epoch
        #[arg(long)]
        fresh: bool,
    },

    /// Add seed URLs to the frontier without crawling
    Submit {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Lower values are leased first
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// List the most recent dead-lettered jobs
    DeadLetters {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Move a dead-lettered job back into the frontier
    Replay { id: JobId },

    /// Show frontier metrics from the last checkpoint
    Stats,

    /// Validate the configuration and show what would be crawled
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Run { fresh } => handle_run(config, config_hash, fresh).await,
        Command::Submit { urls, priority } => {
            handle_submit(config, config_hash, &urls, priority).await
        }
        Command::DeadLetters { limit } => handle_dead_letters(&config, limit),
        Command::Replay { id } => handle_replay(config, config_hash, id).await,
        Command::Stats => handle_stats(&config),
        Command::CheckConfig => handle_check_config(&config, &config_hash),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("harvest_frontier=info,warn"),
            1 => EnvFilter::new("harvest_frontier=debug,info"),
            2 => EnvFilter::new("harvest_frontier=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_shared_storage(config: &Config) -> anyhow::Result<SharedStorage> {
    let path = Path::new(&config.storage.database_path);
    let storage = open_storage(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(shared(storage))
}

/// Opens the coordinator with the default HTTP collaborators
async fn open_coordinator(
    config: Config,
    config_hash: String,
    fresh: bool,
) -> anyhow::Result<Coordinator> {
    let storage = open_shared_storage(&config)?;
    let records_path = Path::new(&config.storage.records_path);
    let sink = JsonLinesSink::open(records_path)
        .await
        .with_context(|| format!("failed to open {}", records_path.display()))?;
    let collaborators = Collaborators::http(&config, Arc::new(sink))?;

    let coordinator = Coordinator::open(
        config,
        storage,
        collaborators,
        RunOptions { fresh, config_hash },
    )?;
    Ok(coordinator)
}

/// Handles the main crawl operation
async fn handle_run(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume if an unfinished epoch exists)");
    }

    let coordinator = open_coordinator(config, config_hash, fresh).await?;
    let report = coordinator.submit_config_seeds().await;
    tracing::info!(
        "Seeds: {} enqueued, {} already seen, {} denied, {} invalid",
        report.enqueued,
        report.duplicates,
        report.denied,
        report.invalid
    );

    let token = coordinator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            token.cancel();
        }
    });

    let reason = coordinator.run().await?;
    print_metrics(&coordinator.metrics());
    match reason {
        StopReason::Drained => println!("\n✓ Frontier drained"),
        StopReason::Requested => println!("\n✓ Crawl interrupted; run again to resume"),
        StopReason::Fatal => bail!("crawl stopped on an infrastructure failure"),
    }
    Ok(())
}

/// Handles `submit`: admits seeds and checkpoints them for the next run
async fn handle_submit(
    config: Config,
    config_hash: String,
    urls: &[String],
    priority: i32,
) -> anyhow::Result<()> {
    let coordinator = open_coordinator(config, config_hash, false).await?;
    let report = coordinator.submit_seeds(urls, priority).await;
    coordinator.save_checkpoint()?;

    println!("Epoch {}:", coordinator.epoch_id());
    println!("  Enqueued: {}", report.enqueued);
    println!("  Already seen: {}", report.duplicates);
    println!("  Denied: {}", report.denied);
    println!("  Invalid: {}", report.invalid);
    Ok(())
}

/// Handles `dead-letters`: lists letters of the latest epoch
fn handle_dead_letters(config: &Config, limit: usize) -> anyhow::Result<()> {
    let storage = open_shared_storage(config)?;
    let Some(epoch) = lock(&storage).get_latest_epoch()? else {
        println!("No crawl epochs recorded");
        return Ok(());
    };

    let store = DeadLetterStore::new(Arc::clone(&storage), epoch.id);
    let letters = store.list(limit)?;
    println!(
        "=== Dead Letters (epoch {}, {} total) ===\n",
        epoch.id,
        store.count()?
    );
    for letter in &letters {
        println!("#{} {}", letter.job.id, letter.job.url);
        println!("  Attempts: {}", letter.job.attempts);
        println!("  Final error: {}", letter.final_error);
        println!("  Dead-lettered at: {}", letter.dead_lettered_at.to_rfc3339());
    }
    if letters.is_empty() {
        println!("(none)");
    }
    Ok(())
}

/// Handles `replay`: moves a letter back into the frontier and checkpoints it
async fn handle_replay(config: Config, config_hash: String, id: JobId) -> anyhow::Result<()> {
    let coordinator = open_coordinator(config, config_hash, false).await?;
    coordinator.replay(id)?;
    coordinator.save_checkpoint()?;
    println!("✓ Job {} queued for replay", id);
    Ok(())
}

/// Handles `stats`: rebuilds the frontier from the checkpoint and prints it
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let storage = open_shared_storage(config)?;
    println!("Database: {}\n", config.storage.database_path);

    let store: Box<dyn CheckpointStore> = match &config.checkpoint.path {
        Some(path) => Box::new(FileCheckpointStore::new(path.clone())),
        None => Box::new(DatabaseCheckpointStore::new(Arc::clone(&storage))),
    };
    let Some(checkpoint) = CheckpointManager::from_config(store, &config.checkpoint).load()? else {
        println!("No checkpoint found");
        return Ok(());
    };

    let epoch = lock(&storage).get_epoch(checkpoint.epoch_id)?;
    println!(
        "Epoch {} ({}), started {}, checkpoint saved {}\n",
        epoch.id,
        epoch.status.to_db_string(),
        epoch.started_at,
        checkpoint.saved_at.to_rfc3339()
    );

    let dead_letters = DeadLetterStore::new(Arc::clone(&storage), epoch.id);
    let queue = JobQueue::from_config(config, Arc::new(AllowAll), dead_letters)?;
    queue.restore(checkpoint.frontier, tokio::time::Instant::now())?;
    print_metrics(&queue.metrics());
    println!(
        "Dead letters stored: {}",
        queue.dead_letters().count()?
    );
    Ok(())
}

/// Handles `check-config`: validates config and shows what would be crawled
fn handle_check_config(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    println!("=== Harvest-Frontier Configuration ===\n");

    let c = &config.coordinator;
    println!("Coordinator:");
    println!("  Workers: {}", c.workers);
    println!("  Lease timeout: {}s", c.lease_timeout_secs);
    println!("  Shutdown grace: {}s", c.shutdown_grace_secs);
    println!("  Fetch timeout: {}s", c.fetch_timeout_secs);
    println!("  Max depth: {}", c.max_depth);

    println!("\nPoliteness:");
    println!(
        "  Default min interval: {}ms",
        config.politeness.default_min_interval_ms
    );
    for entry in &config.politeness.domain {
        println!("  - {}: {}ms", entry.domain, entry.min_interval_ms);
    }

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms .. {}ms",
        config.retry.base_delay_ms, config.retry.max_delay_ms
    );

    let cb = &config.circuit_breaker;
    println!("\nCircuit breaker:");
    println!("  Failure threshold: {}", cb.failure_threshold);
    println!("  Recovery timeout: {}s", cb.recovery_timeout_secs);
    println!("  Half-open probes: {}", cb.half_open_max_concurrent);

    println!("\nCheckpoint:");
    println!(
        "  Every {} jobs or {}s",
        config.checkpoint.every_jobs, config.checkpoint.interval_secs
    );
    match &config.checkpoint.path {
        Some(path) => println!("  File: {}", path.display()),
        None => println!("  Stored in: {}", config.storage.database_path),
    }

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nDenied Domains ({}):", config.deny.len());
    for entry in &config.deny {
        println!("  - {}", entry.domain);
    }

    let seed_count: usize = config.seed.iter().map(|s| s.urls.len()).sum();
    println!("\n✓ Configuration is valid (hash: {})", config_hash);
    println!("✓ Would start crawling with {} seed URLs", seed_count);

    Ok(())
}
