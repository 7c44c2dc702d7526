//! Submitting the probe message through the sending provider.

mod graph;

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use transit_common::{Clock, internal};

pub use graph::{DEFAULT_GRAPH_BASE, GraphMailSender};

use crate::{
    correlation::{CorrelationMarkers, domain_of},
    credential::{AccessToken, CredentialCache},
    error::SendError,
};

/// The only status a provider answers with when it accepted the message.
pub const ACCEPTED: u16 = 202;

/// A fully rendered probe message, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub message_id: String,
    pub headers: Vec<(String, String)>,
    pub save_to_sent_items: bool,
}

/// What the provider answered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    pub status: u16,
    pub body: String,
}

/// A provider's transactional send API.
#[async_trait]
pub trait MailSender: Send + Sync + Debug {
    /// Submit one message with the given bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Transport`] only when no HTTP response was
    /// received. Every status, successful or not, comes back as a
    /// [`SubmitResponse`].
    async fn submit(
        &self,
        token: &AccessToken,
        message: &OutgoingMessage,
    ) -> Result<SubmitResponse, SendError>;
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SentProbe {
    /// Captured immediately before the accepted request went out.
    pub send_epoch: f64,
    pub markers: CorrelationMarkers,
    pub status: u16,
    pub attempts: u8,
}

/// `"<prefix> - <test_id>"`, shared by both sides of the probe.
#[must_use]
pub fn subject_for(prefix: &str, test_id: &str) -> String {
    format!("{prefix} - {test_id}")
}

/// Render `epoch` in `tz` for humans reading the probe mail.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn display_time(epoch: f64, tz: Tz) -> String {
    let secs = epoch.floor() as i64;
    let nanos = ((epoch - epoch.floor()) * 1e9) as u32;

    DateTime::from_timestamp(secs, nanos).map_or_else(
        || format!("{epoch:.3} (epoch)"),
        |utc| {
            utc.with_timezone(&tz)
                .format("%Y-%m-%d %H:%M:%S %Z")
                .to_string()
        },
    )
}

fn render_body(markers: &CorrelationMarkers, send_epoch: f64, tz: Tz) -> String {
    format!(
        "Email Delivery Test\n\
         \n\
         Test ID: {test_id}\n\
         Sent Time: {sent} ({tz})\n\
         Send Epoch: {epoch}\n\
         \n\
         This is an automated email delivery test. Please do not reply.\n",
        test_id = markers.test_id,
        sent = display_time(send_epoch, tz),
        tz = tz.name(),
        epoch = markers.send_epoch,
    )
}

/// Sends probe messages on behalf of one sender account.
#[derive(Debug)]
pub struct SendAdapter {
    sender: Arc<dyn MailSender>,
    credentials: Arc<CredentialCache>,
    clock: Arc<dyn Clock>,
    from: String,
    display_tz: Tz,
    save_to_sent_items: bool,
}

impl SendAdapter {
    pub fn new(
        sender: Arc<dyn MailSender>,
        credentials: Arc<CredentialCache>,
        clock: Arc<dyn Clock>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            credentials,
            clock,
            from: from.into(),
            display_tz: Tz::UTC,
            save_to_sent_items: false,
        }
    }

    #[must_use]
    pub const fn with_display_timezone(mut self, tz: Tz) -> Self {
        self.display_tz = tz;
        self
    }

    #[must_use]
    pub const fn with_save_to_sent_items(mut self, save: bool) -> Self {
        self.save_to_sent_items = save;
        self
    }

    /// Send one probe.
    ///
    /// A 401 invalidates the cached token, forces exactly one refresh and
    /// retries once with fresh markers. Anything else that is not a 202 is
    /// terminal.
    ///
    /// # Errors
    ///
    /// See [`SendError`].
    pub async fn send(
        &self,
        test_id: &str,
        recipient: &str,
        subject_prefix: &str,
    ) -> Result<SentProbe, SendError> {
        let domain =
            domain_of(&self.from).ok_or_else(|| SendError::InvalidSender(self.from.clone()))?;
        let subject = subject_for(subject_prefix, test_id);

        let token = self.credentials.get_token(false).await?;
        let (send_epoch, markers, response) = self
            .attempt(&token, test_id, recipient, &subject, domain)
            .await?;

        if response.status == ACCEPTED {
            return Ok(SentProbe {
                send_epoch,
                markers,
                status: response.status,
                attempts: 1,
            });
        }

        if response.status != 401 {
            return Err(SendError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        internal!(
            level = WARN,
            test_id,
            status = response.status,
            "Send rejected the access token, refreshing and retrying once"
        );

        self.credentials.invalidate().await;
        let token = self.credentials.get_token(true).await?;
        let (send_epoch, markers, response) = self
            .attempt(&token, test_id, recipient, &subject, domain)
            .await?;

        match response.status {
            ACCEPTED => Ok(SentProbe {
                send_epoch,
                markers,
                status: response.status,
                attempts: 2,
            }),
            401 => Err(SendError::Unauthorized {
                body: response.body,
            }),
            status => Err(SendError::Rejected {
                status,
                body: response.body,
            }),
        }
    }

    async fn attempt(
        &self,
        token: &AccessToken,
        test_id: &str,
        recipient: &str,
        subject: &str,
        domain: &str,
    ) -> Result<(f64, CorrelationMarkers, SubmitResponse), SendError> {
        let send_epoch = self.clock.now();
        let markers = CorrelationMarkers::new(test_id, send_epoch, domain);

        let message = OutgoingMessage {
            sender: self.from.clone(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: render_body(&markers, send_epoch, self.display_tz),
            message_id: markers.message_id.clone(),
            headers: markers.headers(),
            save_to_sent_items: self.save_to_sent_items,
        };

        let response = self.sender.submit(token, &message).await?;
        Ok((send_epoch, markers, response))
    }
}
