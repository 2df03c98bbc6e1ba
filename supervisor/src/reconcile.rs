//! The reconciliation tick.
//!
//! Each tick:
//! 1. Reads the global directive, creating it when missing. A pending
//!    restart kills every worker and diagnostic process, clears the flag and
//!    ends the tick; workers come back on the next tick.
//! 2. Compares every valid stream config against the process table and
//!    starts, stops or refreshes status as needed.
//!
//! A tick with unchanged inputs is idempotent: live enabled streams are
//! only refreshed, and nothing is started or killed.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use streamwatch::config::log_file_name;
use streamwatch::store::{StatusReport, Store, StreamConfig};

use crate::launcher::{LaunchSpec, Launcher};
use crate::registry::{ProcessInfo, ProcessRegistry};
use crate::status::tail_line;

/// What a tick does for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Running and wanted: refresh the status report.
    Refresh,
    /// Running but disabled: kill it.
    Stop,
    /// Wanted but not running: launch it.
    Start,
    /// Not running and not wanted.
    Nothing,
    /// Config is incomplete and ignored.
    Skip,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Refresh => "none",
            Self::Stop => "kill",
            Self::Start => "start",
            Self::Nothing => "none",
            Self::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// Decide the action for a valid stream.
pub fn plan_action(live: bool, enabled: bool) -> Action {
    match (live, enabled) {
        (true, true) => Action::Refresh,
        (true, false) => Action::Stop,
        (false, true) => Action::Start,
        (false, false) => Action::Nothing,
    }
}

/// Observed and desired state of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPlan {
    /// The stream config.
    pub stream: StreamConfig,
    /// Processes whose command line mentions the stream uri.
    pub processes: Vec<ProcessInfo>,
    /// What the tick will do.
    pub action: Action,
}

impl StreamPlan {
    /// Whether any process for this stream is running.
    pub fn is_live(&self) -> bool {
        !self.processes.is_empty()
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A restart directive was honored.
    pub fleet_restarted: bool,
    /// Processes killed by the restart directive.
    pub restart_kills: usize,
    /// Titles for which a launch was attempted.
    pub started: Vec<String>,
    /// Titles whose processes were killed.
    pub stopped: Vec<String>,
    /// Titles whose status report was refreshed.
    pub refreshed: Vec<String>,
    /// Titles skipped as invalid.
    pub skipped: Vec<String>,
}

/// The fleet reconciler.
pub struct Reconciler {
    store: Arc<dyn Store>,
    registry: Arc<dyn ProcessRegistry>,
    launcher: Arc<dyn Launcher>,
    log_dir: PathBuf,
    owned_binaries: Vec<String>,
}

impl Reconciler {
    /// Create a reconciler.
    ///
    /// `owned_binaries` are the executable basenames (probe and diagnostic
    /// tool) killed on restart and teardown.
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<dyn ProcessRegistry>,
        launcher: Arc<dyn Launcher>,
        log_dir: PathBuf,
        owned_binaries: Vec<String>,
    ) -> Self {
        Self {
            store,
            registry,
            launcher,
            log_dir,
            owned_binaries,
        }
    }

    /// Run one reconciliation tick.
    ///
    /// # Errors
    ///
    /// Returns an error if stream configs cannot be read. User lookup is
    /// only done when a stream needs launching, and its failure defers those
    /// launches. Directive, launch, kill and status failures are logged and
    /// do not fail the tick.
    pub async fn tick(&self) -> anyhow::Result<TickReport> {
        let mut report = TickReport::default();

        match self.apply_directive().await {
            Ok(Some(kills)) => {
                report.fleet_restarted = true;
                report.restart_kills = kills;
                return Ok(report);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to process global directive"),
        }

        let plans = self.plan().await?;
        if plans.is_empty() {
            info!("no stream configs found, please configure a stream to watch");
            return Ok(report);
        }

        let needs_launch = plans.iter().any(|plan| plan.action == Action::Start);
        let users = if needs_launch {
            match self.store.users().await {
                Ok(users) => Some(users),
                Err(e) => {
                    warn!(error = %e, "failed to read users, deferring launches to the next tick");
                    None
                }
            }
        } else {
            None
        };

        for plan in plans {
            let title = plan.stream.title.clone();
            debug!(
                stream = %title,
                live = plan.is_live(),
                enabled = plan.stream.enabled,
                action = %plan.action,
                "reconciled"
            );
            match plan.action {
                Action::Refresh => {
                    let status = tail_line(&self.log_dir.join(log_file_name(&title)));
                    let status_report = StatusReport {
                        title: title.clone(),
                        status,
                    };
                    if let Err(e) = self.store.upsert_status(&status_report).await {
                        warn!(stream = %title, error = %e, "failed to update status report");
                    }
                    report.refreshed.push(title);
                }
                Action::Stop => {
                    for process in &plan.processes {
                        if let Err(e) = self.registry.terminate(process) {
                            warn!(stream = %title, pid = process.pid, error = %e, "failed to kill monitor");
                        }
                    }
                    report.stopped.push(title);
                }
                Action::Start => {
                    let Some(users) = users.as_deref() else {
                        continue;
                    };
                    let spec = LaunchSpec::new(plan.stream, users);
                    match self.launcher.launch(&spec) {
                        Ok(pid) => info!(stream = %title, pid, "monitor started"),
                        Err(e) => warn!(stream = %title, error = %e, "failed to start monitor"),
                    }
                    report.started.push(title);
                }
                Action::Nothing => {}
                Action::Skip => {
                    info!(stream = %title, "ignoring partially populated stream config");
                    report.skipped.push(title);
                }
            }
        }

        Ok(report)
    }

    /// Handle the global directive.
    ///
    /// Creates a cleared directive when none exists. Returns the number of
    /// processes killed if a restart was requested and honored.
    ///
    /// # Errors
    ///
    /// Returns an error if the directive cannot be read or written.
    pub async fn apply_directive(&self) -> anyhow::Result<Option<usize>> {
        let Some(directive) = self.store.global_directive().await? else {
            info!("no global config found, creating");
            self.store.set_restart_due(false).await?;
            return Ok(None);
        };

        if !directive.restart_due {
            return Ok(None);
        }

        info!("restart requested, killing all monitors");
        let kills = self.teardown();
        self.store.set_restart_due(false).await?;
        Ok(Some(kills))
    }

    /// Observed vs. desired state for every stream config, without acting.
    ///
    /// # Errors
    ///
    /// Returns an error if stream configs cannot be read.
    pub async fn plan(&self) -> anyhow::Result<Vec<StreamPlan>> {
        let configs = self.store.stream_configs().await?;
        if configs.is_empty() {
            return Ok(Vec::new());
        }

        let table = self.registry.list();
        Ok(configs
            .into_iter()
            .map(|stream| {
                if !stream.is_valid() {
                    return StreamPlan {
                        stream,
                        processes: Vec::new(),
                        action: Action::Skip,
                    };
                }
                let processes: Vec<ProcessInfo> = table
                    .iter()
                    .filter(|p| p.mentions(&stream.uri))
                    .cloned()
                    .collect();
                let action = plan_action(!processes.is_empty(), stream.enabled);
                StreamPlan {
                    stream,
                    processes,
                    action,
                }
            })
            .collect())
    }

    /// Kill every probe worker and diagnostic process. Returns the number
    /// of processes successfully killed.
    pub fn teardown(&self) -> usize {
        let owned = |p: &ProcessInfo| {
            p.executable_name()
                .is_some_and(|name| self.owned_binaries.iter().any(|b| b == name))
        };
        let mut killed = 0usize;
        for process in self.registry.find(&owned) {
            match self.registry.terminate(&process) {
                Ok(()) => killed = killed.saturating_add(1),
                Err(e) => warn!(pid = process.pid, error = %e, "failed to kill process"),
            }
        }
        info!(killed, "teardown complete");
        killed
    }
}
