//! Pushover notifier.
//!
//! Each routing target is `<user_key>@<app_token>`. A message is posted to
//! every target; failures are logged per target and the call only fails
//! when no target accepted it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{NotifyError, Notifier};

const CONNECT_TIMEOUT_SECS: u64 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// One Pushover recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushoverTarget {
    /// Pushover user key.
    pub user: String,
    /// Pushover application token.
    pub token: String,
}

impl PushoverTarget {
    /// Parse a `<user_key>@<app_token>` routing key.
    ///
    /// Returns `None` when either half is empty or the separator is missing.
    pub fn parse(routing_key: &str) -> Option<Self> {
        let (user, token) = routing_key.trim().split_once('@')?;
        if user.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self {
            user: user.to_owned(),
            token: token.to_owned(),
        })
    }
}

/// Body of a Pushover messages API reply. `status` is 1 on acceptance.
#[derive(Debug, Deserialize)]
struct PushoverReply {
    status: i64,
    #[serde(default)]
    errors: Vec<String>,
}

/// Interpret a 2xx reply body. Bodies that are not Pushover JSON count as
/// accepted.
fn check_reply(text: &str) -> Result<(), NotifyError> {
    match serde_json::from_str::<PushoverReply>(text) {
        Ok(reply) if reply.status == 1 => Ok(()),
        Ok(reply) => Err(NotifyError::Rejected {
            errors: reply.errors.join("; "),
        }),
        Err(e) => {
            debug!(error = %e, "unrecognized Pushover reply, assuming accepted");
            Ok(())
        }
    }
}

/// Sends notifications through the Pushover messages API.
pub struct PushoverNotifier {
    client: reqwest::Client,
    api_url: String,
    targets: Vec<PushoverTarget>,
}

impl PushoverNotifier {
    /// Create a notifier posting to `api_url` for each target.
    pub fn new(api_url: String, targets: Vec<PushoverTarget>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            api_url,
            targets,
        }
    }

    /// Configured recipients.
    pub fn targets(&self) -> &[PushoverTarget] {
        &self.targets
    }

    async fn send_one(
        &self,
        target: &PushoverTarget,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.api_url)
            .form(&[
                ("token", target.token.as_str()),
                ("user", target.user.as_str()),
                ("title", subject),
                ("message", body),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(NotifyError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        check_reply(&text)
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        if self.targets.is_empty() {
            debug!("no notification targets configured");
            return Ok(());
        }

        let mut any_sent = false;
        for target in &self.targets {
            match self.send_one(target, subject, body).await {
                Ok(()) => any_sent = true,
                Err(e) => warn!(user = %target.user, error = %e, "failed to send Pushover message"),
            }
        }
        if !any_sent {
            return Err(NotifyError::NoTargetAccepted);
        }
        Ok(())
    }
}
