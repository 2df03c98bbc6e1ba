//! Persisted record shapes and the storage capability shared by probe
//! workers and the supervisor.
//!
//! Records are keyed so that every write is either an append
//! (`stream_alerts`) or an upsert by a single key. No operation needs
//! cross-record atomicity, so many processes can share one database.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Timestamp format used for alert and snapshot records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted as a record timestamp.
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Encode a boolean as the persisted `"0"`/`"1"` flag.
pub fn flag_text(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Decode a persisted flag. Only `"1"` means set.
pub fn parse_flag(text: &str) -> bool {
    text.trim() == "1"
}

/// Optional per-stream threshold overrides stored alongside a stream config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    /// Luma threshold for the blackframe filter.
    pub black_threshold: Option<u32>,
    /// Seconds of black before alerting.
    pub black_duration: Option<u64>,
    /// Noise tolerance (dB) for freeze detection.
    pub freeze_threshold: Option<f64>,
    /// Seconds of freeze before the tool reports one. Zero disables it.
    pub freeze_duration: Option<u64>,
    /// Noise floor (dB) for silence detection.
    pub silence_threshold: Option<f64>,
    /// Seconds of silence before the tool reports it.
    pub silence_duration: Option<u64>,
    /// Seconds between snapshot refreshes.
    pub frame_grab_interval: Option<u64>,
}

/// Operator-owned description of one monitored stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Unique display key.
    pub title: String,
    /// Connection target handed to the diagnostic tool.
    pub uri: String,
    /// Whether a worker should be running.
    pub enabled: bool,
    /// Skip video filters and use the audio icon as snapshot.
    pub audio_only: bool,
    /// Optional threshold overrides.
    #[serde(default)]
    pub overrides: ThresholdOverrides,
}

impl StreamConfig {
    /// Minimum accepted uri length.
    pub const MIN_URI_LEN: usize = 4;

    /// Build an enabled video stream config without overrides.
    pub fn new(title: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            uri: uri.into(),
            enabled: true,
            audio_only: false,
            overrides: ThresholdOverrides::default(),
        }
    }

    /// A config is usable when it has a title and a plausible uri.
    pub fn is_valid(&self) -> bool {
        !self.title.is_empty() && self.uri.len() >= Self::MIN_URI_LEN
    }
}

/// Fleet-wide operator directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDirective {
    /// Operator asked for every worker to be restarted.
    pub restart_due: bool,
}

/// One dispatched alert or restore, as appended to `stream_alerts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Local time of the store write.
    pub timestamp: String,
    /// Stream title.
    pub stream: String,
    /// Alert text.
    pub alert: String,
    /// Base64 snapshot current at dispatch time.
    pub image: String,
}

/// Latest status line for a running worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Stream title.
    pub title: String,
    /// Last line of the worker log.
    pub status: String,
}

/// Latest preview image for a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Local time of capture.
    pub timestamp: String,
    /// Stream title.
    pub stream: String,
    /// Base64-encoded JPEG.
    pub data: String,
}

/// Entry in the notification user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Display name, unique.
    pub name: String,
    /// Pushover user key. Empty means no routing.
    pub pushover_id: String,
    /// Pushover application token.
    pub pushover_token: String,
    /// Whether this user should receive alerts.
    pub enabled: bool,
}

impl UserRecord {
    /// Routing key handed to workers, or `None` when the user is not routable.
    pub fn routing_key(&self) -> Option<String> {
        if self.pushover_id.is_empty() || !self.enabled {
            return None;
        }
        Some(format!("{}@{}", self.pushover_id, self.pushover_token))
    }
}

/// Storage capability used by workers and the supervisor.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the global directive, if one has been recorded.
    async fn global_directive(&self) -> anyhow::Result<Option<GlobalDirective>>;

    /// Set (or create) the global restart flag.
    async fn set_restart_due(&self, restart_due: bool) -> anyhow::Result<()>;

    /// All stream configs, ordered by title.
    async fn stream_configs(&self) -> anyhow::Result<Vec<StreamConfig>>;

    /// Insert or replace a stream config keyed by title.
    async fn upsert_stream_config(&self, config: &StreamConfig) -> anyhow::Result<()>;

    /// The notification user directory.
    async fn users(&self) -> anyhow::Result<Vec<UserRecord>>;

    /// Insert or replace a user keyed by name.
    async fn upsert_user(&self, user: &UserRecord) -> anyhow::Result<()>;

    /// Append an alert record.
    async fn insert_alert(&self, record: &AlertRecord) -> anyhow::Result<()>;

    /// Most recent alerts for a stream, newest first.
    async fn recent_alerts(&self, stream: &str, limit: i64) -> anyhow::Result<Vec<AlertRecord>>;

    /// Replace the preview image for a stream.
    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()>;

    /// Current preview image for a stream.
    async fn snapshot(&self, stream: &str) -> anyhow::Result<Option<Snapshot>>;

    /// Replace the status line for a stream.
    async fn upsert_status(&self, report: &StatusReport) -> anyhow::Result<()>;

    /// Current status line for a stream.
    async fn status(&self, title: &str) -> anyhow::Result<Option<StatusReport>>;
}
