//! Probe settings: the sending account, the receiving mailbox and the
//! monitoring cadence.

use std::{path::PathBuf, time::Duration};

use chrono_tz::Tz;
use serde::Deserialize;
use transit_common::error::ConfigError;

use crate::{
    correlation::domain_of,
    credential::{DEFAULT_AUTHORITY, DEFAULT_GRAPH_SCOPE},
    poll::{DEFAULT_GMAIL_BASE, MAX_PAGE_SIZE},
    send::DEFAULT_GRAPH_BASE,
};

const fn default_timeout_secs() -> u64 {
    300
}

const fn default_test_interval_secs() -> u64 {
    60
}

const fn default_poll_backoff_secs() -> u64 {
    5
}

const fn default_max_results() -> u32 {
    MAX_PAGE_SIZE
}

fn default_subject_prefix() -> String {
    "Email Delivery Test".to_string()
}

fn default_display_timezone() -> String {
    "UTC".to_string()
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_graph_base() -> String {
    DEFAULT_GRAPH_BASE.to_string()
}

fn default_scope() -> String {
    DEFAULT_GRAPH_SCOPE.to_string()
}

fn default_gmail_base() -> String {
    DEFAULT_GMAIL_BASE.to_string()
}

fn default_token_file() -> PathBuf {
    PathBuf::from("gmail_token.json")
}

/// Cadence and presentation of the probe.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringConfig {
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// How long to wait for delivery once the send was accepted.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_test_interval_secs")]
    pub test_interval_secs: u64,

    #[serde(default = "default_poll_backoff_secs")]
    pub poll_backoff_secs: u64,

    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// IANA name; only affects the human-readable time in the probe body.
    #[serde(default = "default_display_timezone")]
    pub display_timezone: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            subject_prefix: default_subject_prefix(),
            timeout_secs: default_timeout_secs(),
            test_interval_secs: default_test_interval_secs(),
            poll_backoff_secs: default_poll_backoff_secs(),
            max_results: default_max_results(),
            display_timezone: default_display_timezone(),
        }
    }
}

impl MonitoringConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn test_interval(&self) -> Duration {
        Duration::from_secs(self.test_interval_secs)
    }

    #[must_use]
    pub const fn poll_backoff(&self) -> Duration {
        Duration::from_secs(self.poll_backoff_secs)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the timezone is not a known IANA name.
    pub fn display_tz(&self) -> Result<Tz, ConfigError> {
        self.display_timezone.parse::<Tz>().map_err(|_| {
            ConfigError::invalid(
                "monitoring.display_timezone",
                format!("unknown timezone {:?}", self.display_timezone),
            )
        })
    }

    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subject_prefix.trim().is_empty() {
            return Err(ConfigError::MissingField("monitoring.subject_prefix"));
        }

        for (field, value) in [
            ("monitoring.timeout_secs", self.timeout_secs),
            ("monitoring.test_interval_secs", self.test_interval_secs),
            ("monitoring.poll_backoff_secs", self.poll_backoff_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than 0"));
            }
        }

        if self.max_results == 0 || self.max_results > MAX_PAGE_SIZE {
            return Err(ConfigError::invalid(
                "monitoring.max_results",
                format!("must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }

        self.display_tz().map(|_| ())
    }
}

/// The sending tenant, authenticated with client credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SenderConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub sender_email: String,

    #[serde(default = "default_authority")]
    pub authority: String,

    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_graph_base")]
    pub graph_base: String,

    #[serde(default)]
    pub save_to_sent_items: bool,
}

impl SenderConfig {
    /// # Errors
    ///
    /// Returns the first missing or invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("sender.tenant_id", &self.tenant_id),
            ("sender.client_id", &self.client_id),
            ("sender.client_secret", &self.client_secret),
            ("sender.sender_email", &self.sender_email),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field));
            }
        }

        if domain_of(&self.sender_email).is_none() {
            return Err(ConfigError::invalid(
                "sender.sender_email",
                format!("{} is not an email address", self.sender_email),
            ));
        }

        Ok(())
    }
}

/// The receiving mailbox, authenticated with a stored refresh token.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverConfig {
    pub recipient_email: String,

    /// Authorized-user JSON holding the refresh token.
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    #[serde(default = "default_gmail_base")]
    pub gmail_base: String,
}

impl ReceiverConfig {
    /// # Errors
    ///
    /// Returns the first missing or invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recipient_email.trim().is_empty() {
            return Err(ConfigError::MissingField("receiver.recipient_email"));
        }

        if domain_of(&self.recipient_email).is_none() {
            return Err(ConfigError::invalid(
                "receiver.recipient_email",
                format!("{} is not an email address", self.recipient_email),
            ));
        }

        if self.token_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("receiver.token_file"));
        }

        Ok(())
    }
}
