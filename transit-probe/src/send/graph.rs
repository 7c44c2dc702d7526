use async_trait::async_trait;
use serde::Serialize;
use transit_common::{incoming, outgoing};

use super::{MailSender, OutgoingMessage, SubmitResponse};
use crate::{credential::AccessToken, error::SendError};

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest<'a> {
    message: GraphMessage<'a>,
    save_to_sent_items: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage<'a> {
    subject: &'a str,
    body: ItemBody<'a>,
    to_recipients: [Recipient<'a>; 1],
    internet_message_id: &'a str,
    internet_message_headers: Vec<MessageHeader<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    email_address: EmailAddress<'a>,
}

#[derive(Serialize)]
struct EmailAddress<'a> {
    address: &'a str,
}

#[derive(Serialize)]
struct MessageHeader<'a> {
    name: &'a str,
    value: &'a str,
}

impl<'a> From<&'a OutgoingMessage> for SendMailRequest<'a> {
    fn from(message: &'a OutgoingMessage) -> Self {
        Self {
            message: GraphMessage {
                subject: &message.subject,
                body: ItemBody {
                    content_type: "Text",
                    content: &message.body,
                },
                to_recipients: [Recipient {
                    email_address: EmailAddress {
                        address: &message.recipient,
                    },
                }],
                internet_message_id: &message.message_id,
                internet_message_headers: message
                    .headers
                    .iter()
                    .map(|(name, value)| MessageHeader { name, value })
                    .collect(),
            },
            save_to_sent_items: message.save_to_sent_items,
        }
    }
}

/// Microsoft Graph `sendMail`.
#[derive(Debug, Clone)]
pub struct GraphMailSender {
    http: reqwest::Client,
    base_url: String,
}

impl GraphMailSender {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, sender: &str) -> String {
        format!("{}/users/{sender}/sendMail", self.base_url)
    }
}

#[async_trait]
impl MailSender for GraphMailSender {
    async fn submit(
        &self,
        token: &AccessToken,
        message: &OutgoingMessage,
    ) -> Result<SubmitResponse, SendError> {
        let url = self.endpoint(&message.sender);
        outgoing!(level = DEBUG, %url, subject = %message.subject, "sendMail");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token.secret())
            .json(&SendMailRequest::from(message))
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        incoming!(level = DEBUG, status, "sendMail response");

        Ok(SubmitResponse { status, body })
    }
}
