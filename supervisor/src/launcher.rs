//! Probe worker launch: command construction and detached spawn.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tracing::info;

use streamwatch::store::{StreamConfig, UserRecord};

use crate::config::{LaunchDefaults, SupervisorConfig};

/// Everything needed to start one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    /// The stream to monitor.
    pub stream: StreamConfig,
    /// Notification routing keys (`<user_key>@<app_token>`).
    pub routing: Vec<String>,
}

impl LaunchSpec {
    /// Build a launch spec for `stream`, routing to every eligible user.
    pub fn new(stream: StreamConfig, users: &[UserRecord]) -> Self {
        Self {
            stream,
            routing: routing_targets(users),
        }
    }
}

/// Routing keys for users with a non-empty key and `enabled = true`.
pub fn routing_targets(users: &[UserRecord]) -> Vec<String> {
    users.iter().filter_map(UserRecord::routing_key).collect()
}

/// Capability that starts a probe worker.
pub trait Launcher: Send + Sync {
    /// Start a worker for `spec` and return its pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker could not be spawned.
    fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<u32>;
}

/// Probe worker argument vector for `spec`.
///
/// Durations fall back to `defaults`; other thresholds are only passed
/// when the stream overrides them, leaving the probe's own defaults.
pub fn probe_args(
    spec: &LaunchSpec,
    defaults: &LaunchDefaults,
    probe_config: Option<&Path>,
) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(path) = probe_config {
        args.push("--config".to_owned());
        args.push(path.display().to_string());
    }

    for key in &spec.routing {
        args.push("--pushover".to_owned());
        args.push(key.clone());
    }

    let stream = &spec.stream;
    let o = &stream.overrides;
    let silence_duration = o.silence_duration.unwrap_or(defaults.silence_duration);

    if stream.audio_only {
        args.push("--audio-only".to_owned());
    } else {
        let freeze = o.freeze_duration.unwrap_or(defaults.freeze_duration);
        let black = o.black_duration.unwrap_or(defaults.black_duration);
        push_flag(&mut args, "--freeze-duration", freeze);
        push_flag(&mut args, "--black-duration", black);
        if let Some(v) = o.black_threshold {
            push_flag(&mut args, "--black-threshold", v);
        }
        if let Some(v) = o.freeze_threshold {
            push_flag(&mut args, "--freeze-threshold", v);
        }
    }
    push_flag(&mut args, "--silence-duration", silence_duration);
    if let Some(v) = o.silence_threshold {
        push_flag(&mut args, "--silence-threshold", v);
    }
    if let Some(v) = o.frame_grab_interval {
        push_flag(&mut args, "--frame-grab-interval", v);
    }

    push_flag(&mut args, "--stream-uri", &stream.uri);
    push_flag(&mut args, "--stream-desc", &stream.title);
    args
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: impl std::fmt::Display) {
    args.push(flag.to_owned());
    args.push(value.to_string());
}

/// Spawns `streamwatch` workers as detached processes.
pub struct ProbeLauncher {
    probe_binary: PathBuf,
    run_as_user: Option<String>,
    probe_config: Option<PathBuf>,
    defaults: LaunchDefaults,
    log_dir: PathBuf,
}

impl ProbeLauncher {
    /// Create a launcher. `log_dir` is where workers write `<title>.log`.
    pub fn new(config: &SupervisorConfig, log_dir: &Path) -> Self {
        Self {
            probe_binary: config.probe_binary.clone(),
            run_as_user: config.run_as_user.clone(),
            probe_config: config.probe_config.clone(),
            defaults: config.defaults,
            log_dir: log_dir.to_path_buf(),
        }
    }

    /// Program and arguments for `spec`, including the optional `sudo -u`.
    pub fn command_line(&self, spec: &LaunchSpec) -> (PathBuf, Vec<String>) {
        let args = probe_args(spec, &self.defaults, self.probe_config.as_deref());
        match &self.run_as_user {
            Some(user) => {
                let mut sudo_args = vec![
                    "-u".to_owned(),
                    user.clone(),
                    self.probe_binary.display().to_string(),
                ];
                sudo_args.extend(args);
                (PathBuf::from("sudo"), sudo_args)
            }
            None => (self.probe_binary.clone(), args),
        }
    }

    /// Remove the worker's previous log so its status starts clean.
    fn reset_log(&self, title: &str) -> anyhow::Result<()> {
        let path = self
            .log_dir
            .join(streamwatch::config::log_file_name(title));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to reset log {}", path.display()))
            }
        }
    }
}

impl Launcher for ProbeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<u32> {
        self.reset_log(&spec.stream.title)?;

        let (program, args) = self.command_line(spec);
        info!(
            stream = %spec.stream.title,
            program = %program.display(),
            args = ?args,
            "starting monitor"
        );

        // Dropping the handle leaves the worker running; tokio reaps it on exit.
        let child = tokio::process::Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.display()))?;

        Ok(child.id().unwrap_or_default())
    }
}
