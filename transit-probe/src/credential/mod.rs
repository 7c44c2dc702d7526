//! Bearer token cache.
//!
//! One [`CredentialCache`] per provider account. The cache owns the current
//! token and its expiry, and hands out tokens that stay valid for at least
//! [`REFRESH_MARGIN_SECS`]; anything closer to expiry is refreshed first.
//!
//! ```text
//! get_token(false) ── cached && now < expires_at - 300 ──> cached token
//!        │
//!        └──────────── otherwise ──> TokenProvider::fetch ──> store ──> fresh token
//!
//! get_token(true)  ─────────────────> TokenProvider::fetch ──> store ──> fresh token
//! ```
//!
//! Refresh and write happen under one async mutex, so callers that race on
//! an expired token trigger a single fetch.

mod client_credentials;
mod refresh_token;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use transit_common::{Clock, internal};

pub use client_credentials::{ClientCredentialsProvider, DEFAULT_AUTHORITY, DEFAULT_GRAPH_SCOPE};
pub use refresh_token::{AuthorizedUser, DEFAULT_TOKEN_URI, RefreshTokenProvider};

use crate::error::CredentialError;

/// Tokens closer than this to expiry are never handed out.
pub const REFRESH_MARGIN_SECS: f64 = 300.0;

/// Lifetime assumed when the identity endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// An opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(Arc<str>);

impl AccessToken {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// What an identity endpoint hands back on success.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    pub expires_in: Option<u64>,
}

/// A source of fresh bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync + fmt::Debug {
    /// Exchange stored credentials for a new token.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the exchange fails; the provider's
    /// error code and description are carried in [`CredentialError::Rejected`].
    async fn fetch(&self) -> Result<TokenGrant, CredentialError>;
}

/// A cached token and the absolute epoch at which it stops being valid.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: AccessToken,
    pub expires_at: f64,
}

impl Credential {
    /// Whether the token may still be handed out at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: f64) -> bool {
        now < self.expires_at - REFRESH_MARGIN_SECS
    }
}

/// Owned token cache for a single provider account.
#[derive(Debug)]
pub struct CredentialCache {
    name: &'static str,
    provider: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Credential>>,
}

impl CredentialCache {
    pub fn new(name: &'static str, provider: Arc<dyn TokenProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            provider,
            clock,
            current: Mutex::new(None),
        }
    }

    /// Return a token with at least five minutes of validity left.
    ///
    /// `force` bypasses the cache; use it after a provider rejected the
    /// current token.
    ///
    /// # Errors
    ///
    /// Propagates the provider's [`CredentialError`]. A failed refresh leaves
    /// the previous entry in place, but it will not be handed out once stale.
    pub async fn get_token(&self, force: bool) -> Result<AccessToken, CredentialError> {
        let mut current = self.current.lock().await;

        if !force
            && let Some(credential) = current.as_ref()
            && credential.is_fresh(self.clock.now())
        {
            return Ok(credential.token.clone());
        }

        internal!(
            level = DEBUG,
            provider = self.name,
            force,
            "Requesting a new access token"
        );

        let grant = self.provider.fetch().await?;
        let expires_in = grant.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        #[allow(clippy::cast_precision_loss, reason = "token lifetimes are small")]
        let expires_at = self.clock.now() + expires_in as f64;

        internal!(
            level = INFO,
            provider = self.name,
            expires_in,
            "Access token refreshed"
        );

        *current = Some(Credential {
            token: grant.access_token.clone(),
            expires_at,
        });

        Ok(grant.access_token)
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        self.current.lock().await.take();
    }

    /// The cached credential, if any.
    pub async fn current(&self) -> Option<Credential> {
        self.current.lock().await.clone()
    }
}

/// The body an OAuth2 token endpoint answers with, success or failure.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    /// Interpret the endpoint's answer.
    pub(crate) fn into_grant(self, status: u16) -> Result<TokenGrant, CredentialError> {
        match self.access_token {
            Some(token) if (200..300).contains(&status) && !token.is_empty() => Ok(TokenGrant {
                access_token: AccessToken::new(token),
                expires_in: self.expires_in,
            }),
            _ => Err(CredentialError::Rejected {
                status,
                error: self.error.unwrap_or_else(|| "unknown_error".to_string()),
                description: self.error_description.unwrap_or_default(),
            }),
        }
    }
}

/// POST a form to a token endpoint and interpret the answer.
pub(crate) async fn exchange(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenGrant, CredentialError> {
    transit_common::outgoing!(level = DEBUG, url = token_url, "Token exchange");

    let response = http
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| CredentialError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| CredentialError::Transport(e.to_string()))?;

    transit_common::incoming!(level = DEBUG, status, "Token exchange response");

    let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
        if (200..300).contains(&status) {
            CredentialError::Malformed(e.to_string())
        } else {
            CredentialError::Rejected {
                status,
                error: "http_error".to_string(),
                description: body.chars().take(200).collect(),
            }
        }
    })?;

    parsed.into_grant(status)
}
