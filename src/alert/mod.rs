//! Alert Dispatcher and the notification capability it forwards to.
//!
//! `dispatch` delivers to the [`Notifier`], waits the throttle interval, and
//! then appends an [`AlertRecord`] carrying the snapshot that is current at
//! that moment. Delivery and store failures are logged and never abort
//! detection.

pub mod pushover;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::probe::capture::FrameCapture;
use crate::probe::detector::{Decision, DecisionKind};
use crate::store::{timestamp_now, AlertRecord, Store};

/// Errors from notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP transport failure.
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The notification service answered with an error status.
    #[error("notification service returned {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The service answered 2xx but refused the message.
    #[error("notification rejected: {errors}")]
    Rejected {
        /// Error strings reported by the service.
        errors: String,
    },

    /// Every configured target rejected the message.
    #[error("no notification target accepted the message")]
    NoTargetAccepted,
}

/// Capability that delivers a message to operators.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `body` under `subject` to every configured recipient.
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Dispatcher toggles and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Skip every dispatch (still logged).
    pub disabled: bool,
    /// Pause between delivery and the store write.
    pub throttle: Duration,
    /// Dispatch restore decisions.
    pub send_restored: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            disabled: false,
            throttle: Duration::from_secs(1),
            send_restored: true,
        }
    }
}

/// Result of one dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered (or attempted) and recorded.
    Dispatched,
    /// Skipped because alerting is disabled.
    Disabled,
    /// Skipped because restore notifications are turned off.
    RestoreSuppressed,
}

/// Rate-limits, persists and forwards alerts for one stream.
pub struct AlertDispatcher {
    stream: String,
    settings: DispatchSettings,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn Store>,
    capture: Arc<dyn FrameCapture>,
}

impl AlertDispatcher {
    /// Create a dispatcher for the stream titled `stream`.
    pub fn new(
        stream: String,
        settings: DispatchSettings,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn Store>,
        capture: Arc<dyn FrameCapture>,
    ) -> Self {
        Self {
            stream,
            settings,
            notifier,
            store,
            capture,
        }
    }

    /// Subject line used for every notification.
    pub fn subject(&self) -> String {
        format!("{}:", self.stream)
    }

    /// Dispatch a detector decision, honoring the restore toggle.
    pub async fn dispatch_decision(&self, decision: &Decision) -> DispatchOutcome {
        if decision.kind == DecisionKind::Restore && !self.settings.send_restored {
            info!(
                stream = %self.stream,
                message = %decision.message,
                "restore notifications disabled, skipping"
            );
            return DispatchOutcome::RestoreSuppressed;
        }
        self.dispatch(&decision.message).await
    }

    /// Deliver, throttle, then record `message`.
    pub async fn dispatch(&self, message: &str) -> DispatchOutcome {
        info!(stream = %self.stream, alert = %message, disabled = self.settings.disabled, "alert");
        if self.settings.disabled {
            info!(stream = %self.stream, "alerts are hard-disabled, skipping alert");
            return DispatchOutcome::Disabled;
        }

        let subject = self.subject();
        if let Err(e) = self.notifier.notify(&subject, message).await {
            warn!(stream = %self.stream, error = %e, "alert delivery failed");
        }

        tokio::time::sleep(self.settings.throttle).await;

        let image = match self.capture.current().await {
            Ok(image) => image,
            Err(e) => {
                warn!(stream = %self.stream, error = %e, "no snapshot available for alert record");
                String::new()
            }
        };

        let record = AlertRecord {
            timestamp: timestamp_now(),
            stream: self.stream.clone(),
            alert: message.to_owned(),
            image,
        };
        if let Err(e) = self.store.insert_alert(&record).await {
            warn!(stream = %self.stream, error = %e, "failed to record alert");
        }

        DispatchOutcome::Dispatched
    }
}
