use async_trait::async_trait;

use super::{TokenGrant, TokenProvider, exchange};
use crate::error::CredentialError;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// OAuth2 client-credentials grant against a tenant-scoped authority.
#[derive(Debug, Clone)]
pub struct ClientCredentialsProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl ClientCredentialsProvider {
    pub fn new(
        http: reqwest::Client,
        authority: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url(authority, tenant_id),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: DEFAULT_GRAPH_SCOPE.to_string(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

fn token_url(authority: &str, tenant_id: &str) -> String {
    format!(
        "{}/{tenant_id}/oauth2/v2.0/token",
        authority.trim_end_matches('/')
    )
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn fetch(&self) -> Result<TokenGrant, CredentialError> {
        exchange(
            &self.http,
            &self.token_url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("scope", &self.scope),
            ],
        )
        .await
    }
}
