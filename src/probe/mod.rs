//! Probe Worker: monitors exactly one stream.
//!
//! Launches the diagnostic subprocess, drains both of its output channels
//! through [`reader`] into one queue, classifies each line, feeds the
//! [`detector::ConditionDetector`] and dispatches its decisions. The loop
//! waits on the queue for at most `poll_interval` so snapshot refresh and
//! the subprocess liveness check run even when no line arrives.
//!
//! The worker never restarts itself. Every exit path is a failure; the
//! fleet supervisor is responsible for relaunching it.

pub mod capture;
pub mod classifier;
pub mod command;
pub mod detector;
pub mod reader;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alert::{AlertDispatcher, DispatchOutcome};
use crate::config::Config;
use crate::store::{timestamp_now, Snapshot, Store};

use self::capture::{CaptureError, FrameCapture};
use self::classifier::{classify, ProbeEvent};
use self::command::{Invocation, Thresholds};
use self::detector::{ConditionDetector, Decision, DetectorSettings};
use self::reader::{spawn_reader, Channel, ReaderMessage};

/// Terminal failures of a probe run.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The diagnostic subprocess could not be started.
    #[error("failed to launch diagnostic process: {0}")]
    Launch(#[source] std::io::Error),

    /// The diagnostic subprocess exited.
    #[error("diagnostic process exited with {0}")]
    Exited(String),

    /// Polling the diagnostic subprocess failed.
    #[error("failed to poll diagnostic process: {0}")]
    Wait(#[source] std::io::Error),

    /// Snapshot capture failed; the source is treated as unreachable.
    #[error("snapshot capture failed: {0}")]
    Capture(#[from] CaptureError),
}

/// Timing and toggles for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Bounded wait for each queue read.
    pub poll_interval: Duration,
    /// Snapshot refresh interval, measured by wall clock.
    pub frame_grab_interval: Duration,
    /// Log raw diagnostic lines at debug level.
    pub log_diagnostic_output: bool,
    /// Never dispatch the stream failure alert.
    pub streamdown_disabled: bool,
    /// Condition detector settings.
    pub detector: DetectorSettings,
}

impl WorkerSettings {
    /// Derive worker settings from configuration and stream thresholds.
    pub fn from_config(config: &Config, thresholds: &Thresholds, audio_only: bool) -> Self {
        let frame_grab_secs = if audio_only {
            config.probe.audio_frame_grab_interval_secs
        } else {
            thresholds.frame_grab_interval
        };
        Self {
            poll_interval: Duration::from_millis(config.probe.poll_interval_ms),
            frame_grab_interval: Duration::from_secs(frame_grab_secs),
            log_diagnostic_output: config.probe.log_diagnostic_output,
            streamdown_disabled: config.alerts.streamdown_disabled,
            detector: DetectorSettings {
                black_duration: Duration::from_secs(thresholds.black_duration),
                freeze_duration: Duration::from_secs(thresholds.freeze_duration),
                stale_timeout: Duration::from_secs(config.detector.stale_frame_timeout_secs),
                ramp_up: Duration::from_secs(config.detector.ramp_up_secs),
                freeze_priority: config.detector.freeze_priority,
            },
        }
    }
}

/// One stream's monitor.
pub struct ProbeWorker {
    title: String,
    uri: String,
    invocation: Invocation,
    settings: WorkerSettings,
    dispatcher: AlertDispatcher,
    capture: Arc<dyn FrameCapture>,
    store: Arc<dyn Store>,
    down: bool,
}

impl ProbeWorker {
    /// Assemble a worker. `invocation` is the diagnostic subprocess to run.
    pub fn new(
        title: String,
        uri: String,
        invocation: Invocation,
        settings: WorkerSettings,
        dispatcher: AlertDispatcher,
        capture: Arc<dyn FrameCapture>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            title,
            uri,
            invocation,
            settings,
            dispatcher,
            capture,
            store,
            down: false,
        }
    }

    /// Whether a stream failure has already been reported by this worker.
    pub fn is_down(&self) -> bool {
        self.down
    }

    /// Run until a fatal condition and return it.
    pub async fn run(&mut self) -> ProbeError {
        match self.monitor().await {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }

    /// Report a terminal failure: at most one "Stream failure" alert per
    /// worker lifetime, unless stream-down alerts are disabled.
    pub async fn report_failure(&mut self, error: &ProbeError) -> Option<DispatchOutcome> {
        warn!(stream = %self.title, uri = %self.uri, error = %error, "stream analyzer stopped");
        if self.down {
            return None;
        }
        self.down = true;
        if self.settings.streamdown_disabled {
            info!(stream = %self.title, "stream down alerts are hard-disabled, skipping alert");
            return None;
        }
        let message = format!("Stream failure for: {}", self.uri);
        Some(self.dispatcher.dispatch(&message).await)
    }

    async fn monitor(&mut self) -> Result<std::convert::Infallible, ProbeError> {
        info!(stream = %self.title, uri = %self.uri, "analyzing stream");
        info!(command = %self.invocation, "running diagnostic command");

        let mut cmd = self.invocation.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(ProbeError::Launch)?;
        info!(pid = child.id(), "launched diagnostic process");

        let started = Instant::now();
        let mut detector = ConditionDetector::new(self.settings.detector, started.into_std());
        let mut next_grab = started;
        let mut queue_open = true;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone(), Channel::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx.clone(), Channel::Stderr);
        }
        drop(tx);

        loop {
            if queue_open {
                match tokio::time::timeout(self.settings.poll_interval, rx.recv()).await {
                    Ok(Some(ReaderMessage::Line { text, received_at })) => {
                        self.handle_line(&text, received_at, &mut detector).await;
                    }
                    Ok(Some(ReaderMessage::Closed(channel))) => {
                        debug!(?channel, "diagnostic output channel closed");
                    }
                    Ok(None) => queue_open = false,
                    Err(_) => {
                        debug!("queue empty");
                        detector.expire(std::time::Instant::now());
                    }
                }
            } else {
                tokio::time::sleep(self.settings.poll_interval).await;
                detector.expire(std::time::Instant::now());
            }

            let now = Instant::now();
            if now >= next_grab {
                self.refresh_snapshot().await?;
                next_grab = now
                    .checked_add(self.settings.frame_grab_interval)
                    .unwrap_or(now);
            }

            if let Some(status) = child.try_wait().map_err(ProbeError::Wait)? {
                info!(%status, "diagnostic process died");
                return Err(ProbeError::Exited(status.to_string()));
            }
        }
    }

    /// Classify one line read at `received_at`, log what operators care
    /// about, and dispatch any resulting decisions.
    pub async fn handle_line(
        &self,
        line: &str,
        received_at: std::time::Instant,
        detector: &mut ConditionDetector,
    ) -> Vec<Decision> {
        let event = classify(line);
        match &event {
            ProbeEvent::StreamFound => {
                info!(stream = %self.uri, "found stream");
                info!("{line}");
            }
            ProbeEvent::TransportNotice => info!("{line}"),
            ProbeEvent::BlackFrameSeen { .. } => {}
            _ if self.settings.log_diagnostic_output => debug!("{line}"),
            _ => {}
        }

        let decisions = detector.observe(&event, received_at);
        for decision in &decisions {
            self.dispatcher.dispatch_decision(decision).await;
        }
        decisions
    }

    /// Capture a fresh snapshot and replace the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Capture`] if the capture fails. Store failures
    /// are logged only.
    pub async fn refresh_snapshot(&self) -> Result<(), ProbeError> {
        let data = self.capture.refresh().await?;
        info!(stream = %self.title, "updating frame grab in database");
        let snapshot = Snapshot {
            timestamp: timestamp_now(),
            stream: self.title.clone(),
            data,
        };
        if let Err(e) = self.store.upsert_snapshot(&snapshot).await {
            warn!(stream = %self.title, error = %e, "failed to store snapshot");
        }
        Ok(())
    }
}
