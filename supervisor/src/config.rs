//! Configuration loading for the fleet supervisor.
//!
//! Loads `supervisor.toml` with per-section defaults. All fields use
//! `#[serde(default)]` so a minimal, empty or missing file is valid.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Seconds between reconciliation ticks.
    pub tick_interval_secs: u64,

    /// Probe worker executable. A bare name is resolved through `PATH`.
    pub probe_binary: PathBuf,

    /// Executable basename of the diagnostic tool owned by workers.
    pub diagnostic_binary: String,

    /// Run workers as this user via `sudo -u`.
    pub run_as_user: Option<String>,

    /// Seconds to wait after teardown before exiting.
    pub shutdown_grace_secs: u64,

    /// Probe config forwarded to every worker as `--config`.
    /// Also where the supervisor reads the database and log paths.
    pub probe_config: Option<PathBuf>,

    /// Thresholds passed to every launched worker unless overridden per stream.
    pub defaults: LaunchDefaults,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
            probe_binary: PathBuf::from("streamwatch"),
            diagnostic_binary: "ffmpeg".to_owned(),
            run_as_user: None,
            shutdown_grace_secs: 5,
            probe_config: None,
            defaults: LaunchDefaults::default(),
        }
    }
}

/// Launch thresholds applied to streams without overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LaunchDefaults {
    /// Seconds of black before alerting.
    pub black_duration: u64,
    /// Seconds of freeze before alerting.
    pub freeze_duration: u64,
    /// Seconds of silence before alerting.
    pub silence_duration: u64,
}

impl Default for LaunchDefaults {
    fn default() -> Self {
        Self {
            black_duration: 60,
            freeze_duration: 600,
            silence_duration: 60,
        }
    }
}

impl SupervisorConfig {
    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.tick_interval_secs >= 1,
            "tick_interval_secs must be >= 1"
        );
        anyhow::ensure!(
            !self.probe_binary.as_os_str().is_empty(),
            "probe_binary must not be empty"
        );
        anyhow::ensure!(
            !self.diagnostic_binary.is_empty() && !self.diagnostic_binary.contains('/'),
            "diagnostic_binary must be a bare executable name"
        );
        if let Some(user) = &self.run_as_user {
            anyhow::ensure!(
                !user.is_empty()
                    && user
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'),
                "run_as_user must be a plain user name"
            );
        }
        Ok(())
    }

    /// Executable basename of the probe binary, used to find workers.
    pub fn probe_basename(&self) -> String {
        self.probe_binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Load supervisor configuration from a TOML file. A missing file yields
/// defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or fails
/// validation.
pub fn load_supervisor_config(path: &Path) -> anyhow::Result<SupervisorConfig> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str::<SupervisorConfig>(&contents)
            .with_context(|| format!("failed to parse supervisor config at {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SupervisorConfig::default(),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("failed to read supervisor config at {}", path.display())
            })
        }
    };
    config.validate()?;
    Ok(config)
}

/// Default path of `supervisor.toml` under `~/.streamwatch/`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_supervisor_config_path() -> anyhow::Result<PathBuf> {
    Ok(streamwatch::config::config_dir()?.join("supervisor.toml"))
}
