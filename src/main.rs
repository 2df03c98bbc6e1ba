//! Streamwatch probe entry point.
//!
//! Monitors one stream until a fatal condition, reports a single stream
//! failure alert, waits the check-upness interval and exits non-zero. The
//! fleet supervisor relaunches it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use streamwatch::alert::pushover::{PushoverNotifier, PushoverTarget};
use streamwatch::alert::{AlertDispatcher, DispatchSettings};
use streamwatch::config::{default_config_path, load_config, log_file_name, Config};
use streamwatch::probe::capture::{FfmpegCapture, FrameCapture, StaticImage};
use streamwatch::probe::command::{diagnostic_invocation, Thresholds};
use streamwatch::probe::{ProbeWorker, WorkerSettings};
use streamwatch::store::{SqliteStore, Store};

/// Streamwatch: watch one audio/video stream for black, freeze, silence
/// and stalled frames.
#[derive(Parser, Debug)]
#[command(name = "streamwatch", version, about)]
struct Cli {
    /// Stream URI handed to ffmpeg (e.g. `udp://239.0.0.1:1234`).
    #[arg(long, alias = "stream_uri")]
    stream_uri: String,

    /// Stream title, used as alert subject and log file name.
    #[arg(long, alias = "stream_desc")]
    stream_desc: String,

    /// Pushover routing target `<user_key>@<app_token>`. Repeatable.
    #[arg(long = "pushover", value_name = "USER@TOKEN")]
    pushover: Vec<String>,

    /// Monitor audio only: no video filters, static icon as snapshot.
    #[arg(long, alias = "audio_only")]
    audio_only: bool,

    /// Blackframe luma threshold.
    #[arg(long, alias = "black_threshold", default_value_t = 32)]
    black_threshold: u32,

    /// Seconds of continuous black before alerting.
    #[arg(long, alias = "black_duration", default_value_t = 30)]
    black_duration: u64,

    /// Freeze noise threshold in dB.
    #[arg(long, alias = "freeze_threshold", default_value_t = -50.0, allow_negative_numbers = true)]
    freeze_threshold: f64,

    /// Seconds of freeze before alerting. Zero disables freeze detection.
    #[arg(long, alias = "freeze_duration", default_value_t = 0)]
    freeze_duration: u64,

    /// Silence noise floor in dB.
    #[arg(long, alias = "silence_threshold", default_value_t = -45.0, allow_negative_numbers = true)]
    silence_threshold: f64,

    /// Seconds of silence before alerting.
    #[arg(long, alias = "silence_duration", default_value_t = 60)]
    silence_duration: u64,

    /// Seconds between snapshot refreshes.
    #[arg(long, alias = "frame_grab_interval", default_value_t = 60)]
    frame_grab_interval: u64,

    /// Path to `streamwatch.toml` (default `~/.streamwatch/streamwatch.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn thresholds(&self) -> Thresholds {
        Thresholds {
            black_threshold: self.black_threshold,
            black_duration: self.black_duration,
            freeze_threshold: self.freeze_threshold,
            freeze_duration: self.freeze_duration,
            silence_threshold: self.silence_threshold,
            silence_duration: self.silence_duration,
            frame_grab_interval: self.frame_grab_interval,
        }
    }

    fn targets(&self) -> Vec<PushoverTarget> {
        self.pushover
            .iter()
            .filter_map(|key| {
                let target = PushoverTarget::parse(key);
                if target.is_none() {
                    warn!(routing_key = %key, "ignoring malformed pushover target");
                }
                target
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `.env` may carry STREAMWATCH_DATABASE.
    let _ = dotenvy::dotenv();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let _logging_guard =
        streamwatch::logging::init_probe(&config.paths.log_dir, &log_file_name(&cli.stream_desc))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        stream = %cli.stream_desc,
        uri = %cli.stream_uri,
        "(re)starting"
    );
    if config.alerts.disabled {
        info!("alerts are hard-disabled by configuration");
    }
    if !cli.audio_only && cli.freeze_duration == 0 {
        info!("freezeframe alerting disabled (duration was 0)");
    }

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.store.database)
            .await
            .context("failed to open streamwatch database")?,
    );

    let mut worker = build_worker(&cli, &config, Arc::clone(&store));

    tokio::select! {
        error = worker.run() => {
            info!(uri = %cli.stream_uri, "stream analyzer could not run, sending alert");
            worker.report_failure(&error).await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, alerts disabled");
            std::process::exit(1);
        }
    }

    info!(
        secs = config.probe.check_upness_secs,
        "waiting before exit"
    );
    tokio::time::sleep(Duration::from_secs(config.probe.check_upness_secs)).await;
    std::process::exit(1);
}

/// Wire capture, notifier, dispatcher and worker for the CLI stream.
fn build_worker(cli: &Cli, config: &Config, store: Arc<dyn Store>) -> ProbeWorker {
    let thresholds = cli.thresholds();

    let capture: Arc<dyn FrameCapture> = if cli.audio_only {
        Arc::new(StaticImage::new(&config.paths.audio_icon))
    } else {
        Arc::new(FfmpegCapture::new(
            &config.probe.ffmpeg,
            &cli.stream_uri,
            &config.paths.snapshot_dir,
            &cli.stream_desc,
        ))
    };

    let notifier = Arc::new(PushoverNotifier::new(
        config.alerts.pushover_api_url.clone(),
        cli.targets(),
    ));

    let dispatcher = AlertDispatcher::new(
        cli.stream_desc.clone(),
        DispatchSettings {
            disabled: config.alerts.disabled,
            throttle: Duration::from_secs(config.alerts.throttle_secs),
            send_restored: config.alerts.send_restored,
        },
        notifier,
        Arc::clone(&store),
        Arc::clone(&capture),
    );

    let invocation = diagnostic_invocation(
        &config.probe.ffmpeg,
        &cli.stream_uri,
        cli.audio_only,
        &thresholds,
    );

    ProbeWorker::new(
        cli.stream_desc.clone(),
        cli.stream_uri.clone(),
        invocation,
        WorkerSettings::from_config(config, &thresholds, cli.audio_only),
        dispatcher,
        capture,
        store,
    )
}
