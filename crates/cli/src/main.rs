mod inventory;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use daskeeper_actions::{ActionRegistry, ExecutionContext};
use daskeeper_core::{config, Clock, Config, FsStore, SystemClock};
use daskeeper_ledger::Ledger;
use daskeeper_notify::{spawn_feed_forwarder, Dispatcher, WebhookNotifier};
use daskeeper_policy::{PolicySet, PolicyWatcher};
use daskeeper_scheduler::{spawn_workers, Scheduler, SchedulerHandle};

use crate::inventory::scan_units;

/// Lifecycle management for DAS sensor archives.
#[derive(Parser, Debug)]
#[command(name = "daskeeper", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the policy evaluation tick loop.
    Schedule {
        /// Path to an env-style configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load and validate the policy document, then exit.
    Validate {
        /// Path to an env-style configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
        }
        None => config::load_dotenv(),
    }
    Ok(Config::from_env())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Schedule { config } => schedule(config.as_deref()).await,
        Command::Validate { config } => validate(config.as_deref()),
    }
}

fn validate(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let set = PolicySet::load(&config.policy_path)
        .with_context(|| format!("invalid policy document {}", config.policy_path.display()))?;

    println!(
        "{}: {} policies ({} enabled)",
        set.metadata.name,
        set.len(),
        set.all_enabled().len()
    );
    for policy in set.policies() {
        println!(
            "  {} [{}] triggers={} actions={}",
            policy.name(),
            if policy.is_enabled() { "enabled" } else { "disabled" },
            policy.triggers().len(),
            policy.actions().len(),
        );
    }
    Ok(())
}

async fn schedule(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.log_summary();

    if let Some(parent) = config.ledger.db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let ledger = Arc::new(match &config.ledger.init_file_path {
        Some(init) => Ledger::open_with_init(&config.ledger.db_path, init)
            .context("cannot open job ledger")?,
        None => Ledger::open(&config.ledger.db_path).context("cannot open job ledger")?,
    });

    // A malformed policy document is fatal to startup, not to a running
    // process (reloads keep the previous set).
    let policies = PolicySet::load(&config.policy_path)
        .with_context(|| format!("invalid policy document {}", config.policy_path.display()))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (work_tx, work_rx) = mpsc::unbounded_channel();
    let mut scheduler = Scheduler::new(policies, Arc::clone(&ledger), Arc::clone(&clock), work_tx)
        .context("cannot persist policies to the ledger")?
        .with_policy_path(config.policy_path.clone());

    scheduler.set_units(scan_units(scheduler.policies()));

    // Job execution workers.
    let ctx = ExecutionContext {
        clock,
        store: Arc::new(FsStore::new()),
    };
    let registry = ActionRegistry::with_builtins();
    if let Some(dir) = &config.plugin_dir {
        // External plugin discovery is an installation concern; built-ins
        // cover the declared action kinds.
        info!(dir = %dir.display(), "external plugin directory configured");
    }
    let _workers = spawn_workers(
        config.scheduler.worker_count,
        work_rx,
        Arc::clone(&ledger),
        registry,
        ctx,
    );

    // Observation feed -> notification channels.
    let mut dispatcher = Dispatcher::empty();
    if let Some(url) = &config.notify_webhook_url {
        match WebhookNotifier::new(url.clone(), Default::default()) {
            Ok(notifier) => dispatcher.add_channel(Box::new(notifier)),
            Err(e) => warn!(error = %e, "webhook notifier disabled"),
        }
    }
    let _forwarder = spawn_feed_forwarder(ledger.subscribe(), Arc::new(dispatcher));

    // Intake surface + policy hot-reload.
    let (handle, intake_rx) = SchedulerHandle::channel();
    let reload_handle = handle.clone();
    let _watcher = PolicyWatcher::watch(&config.policy_path, move || {
        if reload_handle.reload_policies().is_err() {
            warn!("scheduler gone; dropping policy reload signal");
        }
    })
    .context("cannot watch policy document")?;

    // Periodic inventory rescan keeps the unit set current between ticks.
    let rescan_handle = handle.clone();
    let rescan_policy_path = config.policy_path.clone();
    let rescan_every = scheduler.evaluation_interval();
    let _rescan = tokio::spawn(async move {
        let mut interval = tokio::time::interval(rescan_every.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            if let Ok(set) = PolicySet::load(&rescan_policy_path) {
                if rescan_handle.set_units(scan_units(&set)).is_err() {
                    break;
                }
            }
        }
    });

    let scheduler_task = tokio::spawn(scheduler.run(intake_rx));

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    info!("shutdown signal received");

    handle.shutdown().ok();
    scheduler_task.await.ok();
    ledger.remove_all_policies().ok();
    info!("shutdown complete");
    Ok(())
}
