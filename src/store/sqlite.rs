//! SQLite-backed [`Store`].
//!
//! The schema is applied inline via `include_str!` on every open and is
//! idempotent. WAL mode lets many worker processes write concurrently with
//! the supervisor's reads.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{
    flag_text, parse_flag, timestamp_now, AlertRecord, GlobalDirective, Snapshot, StatusReport,
    Store, StreamConfig, ThresholdOverrides, UserRecord,
};

/// Shared SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migration fails.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        let migration_sql = include_str!("../../migrations/001_streamwatch_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&pool)
            .await
            .context("failed to apply streamwatch schema migration")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn global_directive(&self) -> anyhow::Result<Option<GlobalDirective>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT restart_due FROM global_configs WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("failed to read global directive")?;

        Ok(row.map(|(restart_due,)| GlobalDirective {
            restart_due: parse_flag(&restart_due),
        }))
    }

    async fn set_restart_due(&self, restart_due: bool) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO global_configs (id, restart_due) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET restart_due = excluded.restart_due",
        )
        .bind(flag_text(restart_due))
        .execute(&self.pool)
        .await
        .context("failed to write global directive")?;

        Ok(())
    }

    async fn stream_configs(&self) -> anyhow::Result<Vec<StreamConfig>> {
        let rows = sqlx::query_as::<_, StreamConfigRow>(
            "SELECT title, uri, enabled, audio,
                    black_threshold, black_duration, freeze_threshold, freeze_duration,
                    silence_threshold, silence_duration, frame_grab_interval
             FROM stream_configs
             ORDER BY title ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to query stream configs")?;

        Ok(rows.into_iter().map(stream_config_from_row).collect())
    }

    async fn upsert_stream_config(&self, config: &StreamConfig) -> anyhow::Result<()> {
        let o = &config.overrides;
        sqlx::query(
            "INSERT INTO stream_configs (title, uri, enabled, audio,
                 black_threshold, black_duration, freeze_threshold, freeze_duration,
                 silence_threshold, silence_duration, frame_grab_interval)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(title) DO UPDATE SET
                 uri = excluded.uri,
                 enabled = excluded.enabled,
                 audio = excluded.audio,
                 black_threshold = excluded.black_threshold,
                 black_duration = excluded.black_duration,
                 freeze_threshold = excluded.freeze_threshold,
                 freeze_duration = excluded.freeze_duration,
                 silence_threshold = excluded.silence_threshold,
                 silence_duration = excluded.silence_duration,
                 frame_grab_interval = excluded.frame_grab_interval",
        )
        .bind(&config.title)
        .bind(&config.uri)
        .bind(flag_text(config.enabled))
        .bind(flag_text(config.audio_only))
        .bind(o.black_threshold.map(i64::from))
        .bind(seconds_to_column(o.black_duration)?)
        .bind(o.freeze_threshold)
        .bind(seconds_to_column(o.freeze_duration)?)
        .bind(o.silence_threshold)
        .bind(seconds_to_column(o.silence_duration)?)
        .bind(seconds_to_column(o.frame_grab_interval)?)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert stream config '{}'", config.title))?;

        Ok(())
    }

    async fn users(&self) -> anyhow::Result<Vec<UserRecord>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT name, pushover_id, pushover_token, enabled FROM users ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to query users")?;

        Ok(rows
            .into_iter()
            .map(|(name, pushover_id, pushover_token, enabled)| UserRecord {
                name,
                pushover_id,
                pushover_token,
                enabled: parse_flag(&enabled),
            })
            .collect())
    }

    async fn upsert_user(&self, user: &UserRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO users (name, pushover_id, pushover_token, enabled)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 pushover_id = excluded.pushover_id,
                 pushover_token = excluded.pushover_token,
                 enabled = excluded.enabled",
        )
        .bind(&user.name)
        .bind(&user.pushover_id)
        .bind(&user.pushover_token)
        .bind(flag_text(user.enabled))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert user '{}'", user.name))?;

        Ok(())
    }

    async fn insert_alert(&self, record: &AlertRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO stream_alerts (timestamp, stream, alert, image) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.timestamp)
        .bind(&record.stream)
        .bind(&record.alert)
        .bind(&record.image)
        .execute(&self.pool)
        .await
        .context("failed to insert alert record")?;

        Ok(())
    }

    async fn recent_alerts(&self, stream: &str, limit: i64) -> anyhow::Result<Vec<AlertRecord>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT timestamp, stream, alert, image FROM stream_alerts
             WHERE stream = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(stream)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to query alerts")?;

        Ok(rows
            .into_iter()
            .map(|(timestamp, stream, alert, image)| AlertRecord {
                timestamp,
                stream,
                alert,
                image,
            })
            .collect())
    }

    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO stream_images (stream, timestamp, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(stream) DO UPDATE SET
                 timestamp = excluded.timestamp,
                 data = excluded.data",
        )
        .bind(&snapshot.stream)
        .bind(&snapshot.timestamp)
        .bind(&snapshot.data)
        .execute(&self.pool)
        .await
        .context("failed to upsert snapshot")?;

        Ok(())
    }

    async fn snapshot(&self, stream: &str) -> anyhow::Result<Option<Snapshot>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT timestamp, stream, data FROM stream_images WHERE stream = ?1",
        )
        .bind(stream)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read snapshot")?;

        Ok(row.map(|(timestamp, stream, data)| Snapshot {
            timestamp,
            stream,
            data,
        }))
    }

    async fn upsert_status(&self, report: &StatusReport) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO stream_reports (title, status, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(title) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(&report.title)
        .bind(&report.status)
        .bind(timestamp_now())
        .execute(&self.pool)
        .await
        .context("failed to upsert status report")?;

        Ok(())
    }

    async fn status(&self, title: &str) -> anyhow::Result<Option<StatusReport>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT title, status FROM stream_reports WHERE title = ?1")
                .bind(title)
                .fetch_optional(&self.pool)
                .await
                .context("failed to read status report")?;

        Ok(row.map(|(title, status)| StatusReport { title, status }))
    }
}

type StreamConfigRow = (
    String,
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<f64>,
    Option<i64>,
    Option<f64>,
    Option<i64>,
    Option<i64>,
);

/// Convert a raw `stream_configs` row tuple into a [`StreamConfig`].
///
/// Negative or out-of-range numeric overrides are treated as absent.
fn stream_config_from_row(row: StreamConfigRow) -> StreamConfig {
    let (
        title,
        uri,
        enabled,
        audio,
        black_threshold,
        black_duration,
        freeze_threshold,
        freeze_duration,
        silence_threshold,
        silence_duration,
        frame_grab_interval,
    ) = row;

    StreamConfig {
        title,
        uri,
        enabled: parse_flag(&enabled),
        audio_only: parse_flag(&audio),
        overrides: ThresholdOverrides {
            black_threshold: black_threshold.and_then(|v| u32::try_from(v).ok()),
            black_duration: black_duration.and_then(|v| u64::try_from(v).ok()),
            freeze_threshold,
            freeze_duration: freeze_duration.and_then(|v| u64::try_from(v).ok()),
            silence_threshold,
            silence_duration: silence_duration.and_then(|v| u64::try_from(v).ok()),
            frame_grab_interval: frame_grab_interval.and_then(|v| u64::try_from(v).ok()),
        },
    }
}

fn seconds_to_column(value: Option<u64>) -> anyhow::Result<Option<i64>> {
    value
        .map(|v| i64::try_from(v).context("duration exceeds database range"))
        .transpose()
}
