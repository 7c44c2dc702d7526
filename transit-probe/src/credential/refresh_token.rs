use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{TokenGrant, TokenProvider, exchange};
use crate::error::CredentialError;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// The authorized-user token file written by a one-off consent flow.
///
/// Extra fields (`token`, `scopes`, `expiry`, ...) are ignored; only the
/// long-lived refresh token matters here.
#[derive(Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for AuthorizedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedUser")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl AuthorizedUser {
    /// Parse the token file contents.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Load`] if the JSON is invalid or a required
    /// field is missing or empty.
    pub fn parse(path: &str, content: &str) -> Result<Self, CredentialError> {
        let user: Self = serde_json::from_str(content).map_err(|e| CredentialError::Load {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        for (field, value) in [
            ("client_id", &user.client_id),
            ("client_secret", &user.client_secret),
            ("refresh_token", &user.refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(CredentialError::Load {
                    path: path.to_string(),
                    reason: format!("{field} is empty"),
                });
            }
        }

        Ok(user)
    }
}

/// OAuth2 refresh-token grant for a user mailbox.
#[derive(Debug, Clone)]
pub struct RefreshTokenProvider {
    http: reqwest::Client,
    user: AuthorizedUser,
}

impl RefreshTokenProvider {
    pub const fn new(http: reqwest::Client, user: AuthorizedUser) -> Self {
        Self { http, user }
    }

    /// Load the authorized-user file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Load`] if the file cannot be read or parsed.
    pub fn from_file(http: reqwest::Client, path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let content = std::fs::read_to_string(path).map_err(|e| CredentialError::Load {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self::new(http, AuthorizedUser::parse(&display, &content)?))
    }

    pub const fn user(&self) -> &AuthorizedUser {
        &self.user
    }
}

#[async_trait]
impl TokenProvider for RefreshTokenProvider {
    async fn fetch(&self) -> Result<TokenGrant, CredentialError> {
        exchange(
            &self.http,
            &self.user.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", &self.user.client_id),
                ("client_secret", &self.user.client_secret),
                ("refresh_token", &self.user.refresh_token),
            ],
        )
        .await
    }
}
