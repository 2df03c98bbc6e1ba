//! Condition Detector: four independent hysteresis machines over the
//! classified event stream.
//!
//! Each machine moves `Idle -> Timing -> Alerted -> Idle`. The detector is
//! a plain struct owned by one worker; time is passed in explicitly so the
//! machines can be driven deterministically.
//!
//! - **Black** times a run of black frames and alerts once the run reaches
//!   `black_duration`. A gap longer than [`BLACK_RESET_WINDOW`] returns it
//!   to `Idle` regardless of state.
//! - **Freeze** and **Silence** are event-triggered (the filter already
//!   waited its own duration). Freeze is suppressed while black is active
//!   unless `freeze_priority` is set.
//! - **StaleFrame** alerts when the frame counter stops increasing for
//!   longer than the stale timeout.
//!
//! Nothing is emitted during the ramp-up window after worker start.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::classifier::ProbeEvent;

/// Gap without a black frame after which the black timer resets.
pub const BLACK_RESET_WINDOW: Duration = Duration::from_secs(5);

/// The four monitored conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    /// Run of black frames.
    Black,
    /// Frozen picture.
    Freeze,
    /// Silent audio.
    Silence,
    /// Frame counter not advancing.
    StaleFrame,
}

/// State of one condition machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConditionState {
    /// Nothing observed.
    #[default]
    Idle,
    /// Condition observed, waiting for it to persist.
    Timing,
    /// Alert dispatched; waiting for the condition to clear.
    Alerted,
}

/// One condition machine's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Condition {
    /// Current state.
    pub state: ConditionState,
    /// When the current Timing phase began.
    pub started_at: Option<Instant>,
    /// When the condition was last observed.
    pub last_seen_at: Option<Instant>,
}

impl Condition {
    fn is_active(&self) -> bool {
        self.state != ConditionState::Idle
    }

    fn start_timing(&mut self, now: Instant) {
        self.state = ConditionState::Timing;
        self.started_at = Some(now);
    }

    fn reset(&mut self) {
        self.state = ConditionState::Idle;
        self.started_at = None;
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }
}

/// Whether a decision raises or resolves a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    /// Condition crossed its threshold.
    Alert,
    /// Condition cleared after an alert.
    Restore,
}

/// An alert or restore the worker should dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Condition that produced the decision.
    pub condition: ConditionKind,
    /// Alert or restore.
    pub kind: DecisionKind,
    /// Message text handed to the dispatcher.
    pub message: String,
}

impl Decision {
    fn alert(condition: ConditionKind, message: String) -> Self {
        Self {
            condition,
            kind: DecisionKind::Alert,
            message,
        }
    }

    fn restore(condition: ConditionKind, message: &str) -> Self {
        Self {
            condition,
            kind: DecisionKind::Restore,
            message: message.to_owned(),
        }
    }
}

/// Thresholds and timing constants for one detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSettings {
    /// Black run length that triggers an alert.
    pub black_duration: Duration,
    /// Freeze duration configured on the filter, quoted in the alert text.
    pub freeze_duration: Duration,
    /// How long the frame counter may stall before alerting.
    pub stale_timeout: Duration,
    /// Window after start during which nothing is emitted.
    pub ramp_up: Duration,
    /// Allow freeze alerts while black is active.
    pub freeze_priority: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            black_duration: Duration::from_secs(30),
            freeze_duration: Duration::ZERO,
            stale_timeout: Duration::from_secs(10),
            ramp_up: Duration::from_secs(10),
            freeze_priority: false,
        }
    }
}

/// Per-stream condition detector.
#[derive(Debug, Clone)]
pub struct ConditionDetector {
    settings: DetectorSettings,
    started_at: Instant,
    black: Condition,
    freeze: Condition,
    silence: Condition,
    stale: Condition,
    last_frame: u64,
}

impl ConditionDetector {
    /// Create a detector whose ramp-up window starts at `started_at`.
    pub fn new(settings: DetectorSettings, started_at: Instant) -> Self {
        Self {
            settings,
            started_at,
            black: Condition::default(),
            freeze: Condition::default(),
            silence: Condition::default(),
            stale: Condition::default(),
            last_frame: 0,
        }
    }

    /// Current state of one condition machine.
    pub fn condition(&self, kind: ConditionKind) -> &Condition {
        match kind {
            ConditionKind::Black => &self.black,
            ConditionKind::Freeze => &self.freeze,
            ConditionKind::Silence => &self.silence,
            ConditionKind::StaleFrame => &self.stale,
        }
    }

    /// Highest frame counter seen so far.
    pub fn last_frame(&self) -> u64 {
        self.last_frame
    }

    /// Whether `now` still falls inside the ramp-up window.
    pub fn in_ramp_up(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) <= self.settings.ramp_up
    }

    /// Feed one classified event observed at `now`.
    ///
    /// Runs [`expire`](Self::expire) before and after the event, so a gap
    /// ending in a black frame starts a fresh run.
    pub fn observe(&mut self, event: &ProbeEvent, now: Instant) -> Vec<Decision> {
        if self.in_ramp_up(now) {
            return Vec::new();
        }
        self.expire(now);

        let mut decisions = Vec::new();
        match event {
            ProbeEvent::BlackFrameSeen { frame, .. } => {
                self.on_black_frame(*frame, now, &mut decisions);
            }
            ProbeEvent::BlackSegmentEnded => {
                if self.black.state == ConditionState::Alerted {
                    info!("black segment ended");
                    self.black.reset();
                    decisions.push(Decision::restore(
                        ConditionKind::Black,
                        "Blackframe issue ended",
                    ));
                }
            }
            ProbeEvent::FreezeStarted => self.on_freeze_started(now, &mut decisions),
            ProbeEvent::FreezeEnded => {
                if self.freeze.state == ConditionState::Alerted {
                    self.freeze.reset();
                    decisions.push(Decision::restore(
                        ConditionKind::Freeze,
                        "Freezeframe issue ended",
                    ));
                }
            }
            ProbeEvent::SilenceStarted => {
                self.silence.last_seen_at = Some(now);
                if self.silence.state != ConditionState::Alerted {
                    self.silence.state = ConditionState::Alerted;
                    self.silence.started_at = Some(now);
                    decisions.push(Decision::alert(
                        ConditionKind::Silence,
                        "SILENCE DURATION EXCEEDED".to_owned(),
                    ));
                }
            }
            ProbeEvent::SilenceEnded => {
                if self.silence.state == ConditionState::Alerted {
                    self.silence.reset();
                    decisions.push(Decision::restore(ConditionKind::Silence, "Audio restored"));
                }
            }
            ProbeEvent::FrameCounter(n) => self.on_frame_counter(*n, now, &mut decisions),
            ProbeEvent::StreamFound | ProbeEvent::TransportNotice | ProbeEvent::Uninteresting => {}
        }

        self.expire(now);
        decisions
    }

    /// Apply the black reset window at `now`.
    ///
    /// Called when the queue stays empty for a poll, so a gap in black
    /// frames resets the timer without an explicit end marker or a later
    /// black frame.
    pub fn expire(&mut self, now: Instant) {
        if self.in_ramp_up(now) || !self.black.is_active() {
            return;
        }
        let Some(last_seen) = self.black.last_seen_at else {
            return;
        };
        if now.saturating_duration_since(last_seen) > BLACK_RESET_WINDOW {
            debug!("black reset window elapsed, resetting black timer");
            self.black.reset();
        }
    }

    fn on_black_frame(&mut self, frame: u64, now: Instant, decisions: &mut Vec<Decision>) {
        self.black.last_seen_at = Some(now);

        if self.black.state == ConditionState::Idle {
            info!(frame, "black frame seen, starting black timer");
            self.black.start_timing(now);
        }

        if self.black.state == ConditionState::Timing {
            let elapsed = self.black.elapsed(now);
            debug!(frame, elapsed_secs = elapsed.as_secs(), "black timer running");
            if elapsed >= self.settings.black_duration {
                self.black.state = ConditionState::Alerted;
                decisions.push(Decision::alert(
                    ConditionKind::Black,
                    format!(
                        "BLACKFRAME DURATION EXCEEDED {}sec",
                        self.settings.black_duration.as_secs()
                    ),
                ));
            }
        }
    }

    fn on_freeze_started(&mut self, now: Instant, decisions: &mut Vec<Decision>) {
        self.freeze.last_seen_at = Some(now);
        if self.freeze.state == ConditionState::Alerted {
            return;
        }
        if self.black.is_active() && !self.settings.freeze_priority {
            info!("suppressing freeze alert due to black screen");
            return;
        }
        self.freeze.state = ConditionState::Alerted;
        self.freeze.started_at = Some(now);
        decisions.push(Decision::alert(
            ConditionKind::Freeze,
            format!(
                "FREEZEFRAME DURATION EXCEEDED {}sec",
                self.settings.freeze_duration.as_secs()
            ),
        ));
    }

    fn on_frame_counter(&mut self, frame: u64, now: Instant, decisions: &mut Vec<Decision>) {
        if frame > self.last_frame {
            self.last_frame = frame;
            self.stale.last_seen_at = Some(now);
            if self.stale.state == ConditionState::Alerted {
                decisions.push(Decision::restore(
                    ConditionKind::StaleFrame,
                    "NO_NEW_FRAMES CONDITION ENDED",
                ));
            }
            self.stale.reset();
            return;
        }

        if self.stale.state == ConditionState::Idle {
            self.stale.start_timing(now);
        }

        if self.stale.state == ConditionState::Timing
            && self.stale.elapsed(now) > self.settings.stale_timeout
        {
            self.stale.state = ConditionState::Alerted;
            decisions.push(Decision::alert(
                ConditionKind::StaleFrame,
                format!(
                    "NO_NEW_FRAMES DURATION EXCEEDED {}sec",
                    self.settings.stale_timeout.as_secs()
                ),
            ));
        }
    }
}
