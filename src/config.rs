//! Configuration loading and validation for the probe worker.
//!
//! Loads `streamwatch.toml` with per-section defaults. Every section uses
//! `#[serde(default)]`, so an empty file is valid and a missing file means
//! defaults. Environment variables override file values.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable that overrides `[store].database`.
pub const DATABASE_ENV: &str = "STREAMWATCH_DATABASE";

/// Top-level probe configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistence backend settings.
    pub store: StoreConfig,
    /// Filesystem locations for logs and snapshots.
    pub paths: PathsConfig,
    /// Alert delivery toggles and pacing.
    pub alerts: AlertsConfig,
    /// Condition detector timing constants.
    pub detector: DetectorConfig,
    /// Diagnostic subprocess settings.
    pub probe: ProbeConfig,
}

/// Persistence backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database shared by workers and the supervisor.
    pub database: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_root().join("streamwatch.db"),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one `<title>.log` per worker.
    pub log_dir: PathBuf,
    /// Directory where frame grabs are written before encoding.
    pub snapshot_dir: PathBuf,
    /// Static image used as the snapshot for audio-only streams.
    pub audio_icon: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let root = default_root();
        Self {
            log_dir: root.join("logs"),
            snapshot_dir: root.join("snapshots"),
            audio_icon: root.join("audio_icon.jpg"),
        }
    }
}

/// Alert delivery toggles and pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Hard-disable every alert. Decisions are still logged.
    pub disabled: bool,
    /// Hard-disable only the "Stream failure" alert.
    pub streamdown_disabled: bool,
    /// Minimum spacing between a delivery and the following store write.
    pub throttle_secs: u64,
    /// Dispatch restore notifications when a condition clears.
    pub send_restored: bool,
    /// Pushover messages endpoint.
    pub pushover_api_url: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            streamdown_disabled: false,
            throttle_secs: 1,
            send_restored: true,
            pushover_api_url: default_pushover_api_url(),
        }
    }
}

/// Condition detector timing constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Seconds after worker start during which no alert or restore is emitted.
    pub ramp_up_secs: u64,
    /// Seconds without a new frame before a stale-frame alert.
    pub stale_frame_timeout_secs: u64,
    /// Let freeze alerts fire even while a black condition is in progress.
    pub freeze_priority: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ramp_up_secs: 10,
            stale_frame_timeout_secs: 10,
            freeze_priority: false,
        }
    }
}

/// Diagnostic subprocess settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg: PathBuf,
    /// Seconds a failed worker waits before exiting.
    pub check_upness_secs: u64,
    /// Bounded wait for each read from the delivery queue.
    pub poll_interval_ms: u64,
    /// Write every raw diagnostic line to the worker log at debug level.
    pub log_diagnostic_output: bool,
    /// Snapshot refresh interval used for audio-only streams.
    pub audio_frame_grab_interval_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("/usr/bin/ffmpeg"),
            check_upness_secs: 3600,
            poll_interval_ms: 1000,
            log_diagnostic_output: false,
            audio_frame_grab_interval_secs: 3600,
        }
    }
}

impl Config {
    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.probe.poll_interval_ms >= 10,
            "probe.poll_interval_ms must be >= 10"
        );
        anyhow::ensure!(
            self.detector.stale_frame_timeout_secs >= 1,
            "detector.stale_frame_timeout_secs must be >= 1"
        );
        anyhow::ensure!(
            self.probe.audio_frame_grab_interval_secs >= 1,
            "probe.audio_frame_grab_interval_secs must be >= 1"
        );
        anyhow::ensure!(
            self.alerts.pushover_api_url.starts_with("https://")
                || self.alerts.pushover_api_url.starts_with("http://"),
            "alerts.pushover_api_url must be an http(s) URL"
        );
        Ok(())
    }

    /// Apply environment overrides using the supplied lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database) = lookup(DATABASE_ENV).filter(|v| !v.trim().is_empty()) {
            self.store.database = PathBuf::from(database);
        }
    }
}

/// Load probe configuration from a TOML file.
///
/// A missing file yields defaults. Environment overrides are applied before
/// validation.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or fails
/// validation.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str::<Config>(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config at {}", path.display()))
        }
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Resolve the default config directory (`~/.streamwatch/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".streamwatch"))
}

/// Default path of the probe configuration file.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("streamwatch.toml"))
}

/// File name of a worker's log inside `log_dir`.
///
/// Path separators and control characters in the title are replaced so a
/// title can never escape the log directory.
pub fn log_file_name(title: &str) -> String {
    let safe: String = title
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    format!("{safe}.log")
}

fn default_root() -> PathBuf {
    config_dir().unwrap_or_else(|_| PathBuf::from(".streamwatch"))
}

// Default value functions for serde.

fn default_pushover_api_url() -> String {
    "https://api.pushover.net/1/messages.json".to_owned()
}
