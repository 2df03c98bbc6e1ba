//! Streamwatch supervisor CLI entry point.
//!
//! Provides `start` (run the reconciliation loop until SIGINT/SIGTERM) and
//! `check` (print what a tick would do, without acting).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use streamwatch::config::{default_config_path, load_config, Config};
use streamwatch::store::{SqliteStore, Store};
use supervisor::config::{default_supervisor_config_path, load_supervisor_config, SupervisorConfig};
use supervisor::launcher::ProbeLauncher;
use supervisor::reconcile::Reconciler;
use supervisor::registry::ProcTable;

/// Streamwatch supervisor: keeps one probe running per enabled stream.
#[derive(Parser)]
#[command(name = "streamwatch-supervisor", version, about)]
struct Cli {
    /// Path to `supervisor.toml` (default `~/.streamwatch/supervisor.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the supervisor loop.
    Start,
    /// Report desired vs. observed state for every stream and exit.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `.env` may carry STREAMWATCH_DATABASE.
    let _ = dotenvy::dotenv();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_supervisor_config_path()?,
    };
    let config = load_supervisor_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let probe_config = load_probe_config(&config)?;

    match cli.command {
        Command::Start => handle_start(config, probe_config).await,
        Command::Check => handle_check(config, probe_config).await,
    }
}

/// Probe configuration shared with workers: database and log locations.
fn load_probe_config(config: &SupervisorConfig) -> anyhow::Result<Config> {
    let path = match &config.probe_config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    load_config(&path).with_context(|| format!("failed to load {}", path.display()))
}

async fn build_reconciler(
    config: &SupervisorConfig,
    probe_config: &Config,
) -> anyhow::Result<Reconciler> {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&probe_config.store.database)
            .await
            .context("failed to open streamwatch database")?,
    );
    let launcher = Arc::new(ProbeLauncher::new(config, &probe_config.paths.log_dir));
    Ok(Reconciler::new(
        store,
        Arc::new(ProcTable::new()),
        launcher,
        probe_config.paths.log_dir.clone(),
        vec![config.probe_basename(), config.diagnostic_binary.clone()],
    ))
}

/// Run the supervisor loop until a shutdown signal, then tear down.
async fn handle_start(config: SupervisorConfig, probe_config: Config) -> anyhow::Result<()> {
    let _logging_guard = streamwatch::logging::init_daemon(
        &probe_config.paths.log_dir.join("supervisor"),
        "supervisor.log",
    )?;

    let reconciler = build_reconciler(&config, &probe_config).await?;

    info!(
        database = %probe_config.store.database.display(),
        log_dir = %probe_config.paths.log_dir.display(),
        tick_secs = config.tick_interval_secs,
        "streamwatch supervisor started"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut interval = tokio::time::interval(Duration::from_secs(config.tick_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match reconciler.tick().await {
                    Ok(report) if report.fleet_restarted => {
                        info!(killed = report.restart_kills, "fleet restart applied");
                    }
                    Ok(report) => {
                        if !report.started.is_empty() || !report.stopped.is_empty() {
                            info!(
                                started = ?report.started,
                                stopped = ?report.stopped,
                                "reconciled fleet"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "reconciliation tick failed, retrying next tick"),
                }
            }
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    reconciler.teardown();
    tokio::time::sleep(Duration::from_secs(config.shutdown_grace_secs)).await;
    info!("streamwatch supervisor stopped");
    Ok(())
}

/// Print what a tick would do for every stream.
async fn handle_check(config: SupervisorConfig, probe_config: Config) -> anyhow::Result<()> {
    streamwatch::logging::init_cli();

    let reconciler = build_reconciler(&config, &probe_config).await?;
    let plans = reconciler.plan().await?;

    if plans.is_empty() {
        println!("No stream configs found.");
        return Ok(());
    }

    for plan in &plans {
        let pids: Vec<String> = plan.processes.iter().map(|p| p.pid.to_string()).collect();
        println!(
            "{title}: running={running} enabled={enabled} action={action}{pids}",
            title = plan.stream.title,
            running = u8::from(plan.is_live()),
            enabled = u8::from(plan.stream.enabled),
            action = plan.action,
            pids = if pids.is_empty() {
                String::new()
            } else {
                format!(" pids={}", pids.join(","))
            },
        );
    }
    Ok(())
}

/// Resolves on SIGINT or (on unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
