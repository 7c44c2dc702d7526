//! Typed error handling for probe operations.
//!
//! Each stage of a cycle has its own error type, and all of them fold into
//! [`ProbeError`], which sorts failures into the classes the cycle controller
//! cares about:
//! - `Auth`: credential exchange failed, or the provider still refused the
//!   request after a forced token refresh. Terminal for the cycle.
//! - `Transport`: network failures and provider 5xx. Retried by the poll loop.
//! - `Timeout`: no matching message before the deadline. Reported, not raised.
//! - `Config`: bad settings. Only ever fatal at startup.

use thiserror::Error;
use transit_common::error::ConfigError;

/// Top-level probe error.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Authentication failure: {0}")]
    Auth(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Message not received within {0:.0} seconds")]
    Timeout(f64),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ProbeError {
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Errors raised while obtaining a bearer token.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The identity endpoint answered, but refused to issue a token.
    #[error("Token request rejected ({status}): {error}: {description}")]
    Rejected {
        status: u16,
        error: String,
        description: String,
    },

    /// The identity endpoint could not be reached.
    #[error("Token endpoint unreachable: {0}")]
    Transport(String),

    /// The identity endpoint answered with something that is not a token response.
    #[error("Malformed token response: {0}")]
    Malformed(String),

    /// Stored credentials could not be loaded.
    #[error("Failed to load credentials from {path}: {reason}")]
    Load { path: String, reason: String },
}

impl CredentialError {
    /// Returns `true` when asking again later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Malformed(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::Load { .. } => false,
        }
    }
}

/// Errors raised by the send adapter.
#[derive(Debug, Error)]
pub enum SendError {
    /// No token could be obtained for the sending provider.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The provider answered 401 again after a forced token refresh.
    #[error("Send unauthorized after token refresh: {body}")]
    Unauthorized { body: String },

    /// The provider answered with a non-202 status.
    #[error("Send rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The request never produced an HTTP response.
    #[error("Send transport failure: {0}")]
    Transport(String),

    /// The sender address has no domain to scope the message identifier.
    #[error("Invalid sender address: {0}")]
    InvalidSender(String),
}

impl SendError {
    /// The HTTP status the provider answered with, if it answered at all.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Rejected { status, .. } => Some(*status),
            Self::Credential(CredentialError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised while querying the receiving mailbox.
#[derive(Debug, Error)]
pub enum PollError {
    /// No token could be obtained for the mailbox.
    #[error("Mailbox credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The mailbox answered 401 again after a forced token refresh.
    #[error("Mailbox request unauthorized after token refresh")]
    Unauthorized,

    /// The mailbox answered with an unexpected status.
    #[error("Mailbox request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced an HTTP response.
    #[error("Mailbox transport failure: {0}")]
    Transport(String),

    /// The mailbox answered with a body we could not decode.
    #[error("Malformed mailbox response: {0}")]
    Malformed(String),

    /// A search page matched nothing and at least one of its messages could
    /// not be fetched.
    #[error("Could not fetch {failed} candidate(s), last was {message_id}: {source}")]
    Candidates {
        failed: usize,
        message_id: String,
        source: Box<PollError>,
    },
}

/// Gmail answers 403 rather than 429 when a quota is exhausted.
const RATE_LIMIT_REASONS: [&str; 2] = ["rateLimitExceeded", "userRateLimitExceeded"];

impl PollError {
    /// Returns `true` when the poll loop should back off and try again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Malformed(_) | Self::Candidates { .. } => true,
            Self::Status { status: 403, body } => RATE_LIMIT_REASONS
                .iter()
                .any(|reason| body.contains(reason)),
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Credential(e) => e.is_transient(),
            Self::Unauthorized => false,
        }
    }

    /// Returns `true` when the mailbox refused our credentials, so no later
    /// request with them can succeed either.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        match self {
            Self::Unauthorized => true,
            Self::Credential(e) => !e.is_transient(),
            _ => false,
        }
    }
}

impl From<CredentialError> for ProbeError {
    fn from(error: CredentialError) -> Self {
        if error.is_transient() {
            Self::Transport(error.to_string())
        } else {
            Self::Auth(error.to_string())
        }
    }
}

impl From<SendError> for ProbeError {
    fn from(error: SendError) -> Self {
        match error {
            SendError::Credential(e) => e.into(),
            e @ SendError::Unauthorized { .. } => Self::Auth(e.to_string()),
            e @ (SendError::Rejected { .. } | SendError::Transport(_)) => {
                Self::Transport(e.to_string())
            }
            SendError::InvalidSender(address) => {
                Self::Config(ConfigError::invalid("sender.sender_email", address))
            }
        }
    }
}

impl From<PollError> for ProbeError {
    fn from(error: PollError) -> Self {
        match error {
            PollError::Credential(e) => e.into(),
            e @ PollError::Unauthorized => Self::Auth(e.to_string()),
            e => Self::Transport(e.to_string()),
        }
    }
}
