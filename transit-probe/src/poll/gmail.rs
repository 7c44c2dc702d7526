use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use transit_common::{incoming, internal, outgoing};

use super::{CandidateMessage, Mailbox, MailboxQuery};
use crate::{
    credential::{AccessToken, CredentialCache},
    error::PollError,
};

pub const DEFAULT_GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Only messages this recent are considered.
const SEARCH_WINDOW: &str = "newer_than:1h";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageMetadata {
    id: String,
    internal_date: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl TryFrom<MessageMetadata> for CandidateMessage {
    type Error = PollError;

    fn try_from(message: MessageMetadata) -> Result<Self, Self::Error> {
        let millis: i64 = message.internal_date.trim().parse().map_err(|_| {
            PollError::Malformed(format!(
                "internalDate {:?} of message {} is not epoch milliseconds",
                message.internal_date, message.id
            ))
        })?;

        #[allow(clippy::cast_precision_loss, reason = "millisecond epochs fit in f64")]
        let received_epoch = millis as f64 / 1000.0;

        Ok(Self::new(
            message.id,
            received_epoch,
            message
                .payload
                .headers
                .into_iter()
                .map(|header| (header.name, header.value)),
        ))
    }
}

/// The search expression for a probe subject.
fn search_expression(subject: &str) -> String {
    format!("subject:\"{}\" {SEARCH_WINDOW}", subject.replace('"', ""))
}

/// Gmail REST API, authorized with a refresh-token credential.
#[derive(Debug)]
pub struct GmailMailbox {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialCache>,
}

impl GmailMailbox {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Arc<CredentialCache>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    async fn request(
        &self,
        token: &AccessToken,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, PollError> {
        self.http
            .get(url)
            .bearer_auth(token.secret())
            .query(query)
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))
    }

    /// GET `url`, refreshing the token and retrying once on 401.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, PollError> {
        outgoing!(level = TRACE, url, "Mailbox request");

        let token = self.credentials.get_token(false).await?;
        let mut response = self.request(&token, url, query).await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            internal!(
                level = WARN,
                "Mailbox rejected the access token, refreshing and retrying once"
            );

            self.credentials.invalidate().await;
            let token = self.credentials.get_token(true).await?;
            response = self.request(&token, url, query).await?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                return Err(PollError::Unauthorized);
            }
        }

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        incoming!(level = TRACE, status, "Mailbox response");

        if !(200..300).contains(&status) {
            return Err(PollError::Status { status, body });
        }

        serde_json::from_str(&body).map_err(|e| PollError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn search(&self, query: &MailboxQuery) -> Result<Vec<String>, PollError> {
        let url = format!("{}/users/me/messages", self.base_url);
        let list: ListResponse = self
            .get_json(
                &url,
                &[
                    ("q", search_expression(&query.subject)),
                    ("maxResults", query.max_results.to_string()),
                ],
            )
            .await?;

        Ok(list.messages.into_iter().map(|message| message.id).collect())
    }

    async fn fetch_metadata(
        &self,
        message_id: &str,
        headers: &[&str],
    ) -> Result<CandidateMessage, PollError> {
        let url = format!("{}/users/me/messages/{message_id}", self.base_url);

        let mut query = vec![("format", "metadata".to_string())];
        query.extend(
            headers
                .iter()
                .map(|header| ("metadataHeaders", (*header).to_string())),
        );

        let message: MessageMetadata = self.get_json(&url, &query).await?;
        message.try_into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_search_expression() {
        assert_eq!(
            search_expression("Delivery Probe - abcd1234"),
            "subject:\"Delivery Probe - abcd1234\" newer_than:1h"
        );
        assert_eq!(
            search_expression("say \"hi\" - 1"),
            "subject:\"say hi - 1\" newer_than:1h"
        );
    }

    #[test]
    fn test_list_without_messages() {
        let list: ListResponse = serde_json::from_str(r#"{"resultSizeEstimate":0}"#).unwrap();
        assert!(list.messages.is_empty());
    }

    #[test]
    fn test_metadata_into_candidate() {
        let message: MessageMetadata = serde_json::from_str(
            r#"{
                "id": "18c1f0a2b3",
                "threadId": "18c1f0a2b3",
                "internalDate": "1700000037000",
                "payload": {
                    "headers": [
                        {"name": "X-Probe", "value": "true"},
                        {"name": "X-Probe-Test-Id", "value": "abcd1234"},
                        {"name": "X-Probe-Send-Epoch", "value": "1700000000"}
                    ]
                }
            }"#,
        )
        .unwrap();

        let candidate = CandidateMessage::try_from(message).unwrap();

        assert_eq!(candidate.provider_message_id, "18c1f0a2b3");
        assert!((candidate.received_epoch - 1_700_000_037.0).abs() < f64::EPSILON);
        assert_eq!(candidate.header("x-probe-test-id"), Some("abcd1234"));
    }

    #[test]
    fn test_bad_internal_date_is_malformed() {
        let message: MessageMetadata =
            serde_json::from_str(r#"{"id":"m","internalDate":"soon"}"#).unwrap();

        let err = CandidateMessage::try_from(message).unwrap_err();
        assert!(matches!(err, PollError::Malformed(_)));
        assert!(err.is_transient());
    }
}
