//! In-memory providers for exercising cycles without a network.
//!
//! [`MockMailSender`] can be wired to a [`MockMailbox`] so that accepted
//! messages show up in the inbox, which is enough to drive full cycles with a
//! [`ManualClock`](transit_common::ManualClock).

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    correlation::SEND_EPOCH_HEADER,
    credential::{AccessToken, TokenGrant, TokenProvider},
    error::{CredentialError, PollError, SendError},
    poll::{CandidateMessage, Mailbox, MailboxQuery},
    send::{ACCEPTED, MailSender, OutgoingMessage, SubmitResponse},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Issues `token-1`, `token-2`, ... and counts how often it was asked.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    fetches: AtomicUsize,
    expires_in: Option<u64>,
    failures: Mutex<VecDeque<CredentialError>>,
}

impl StaticTokenProvider {
    #[must_use]
    pub fn new(expires_in: Option<u64>) -> Self {
        Self {
            expires_in,
            ..Self::default()
        }
    }

    /// Fail the next fetch with `error`.
    pub fn fail_next(&self, error: CredentialError) {
        lock(&self.failures).push_back(error);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch(&self) -> Result<TokenGrant, CredentialError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }

        Ok(TokenGrant {
            access_token: AccessToken::new(format!("token-{n}")),
            expires_in: self.expires_in,
        })
    }
}

struct StoredMessage {
    subject: String,
    candidate: CandidateMessage,
}

/// An inbox that answers searches by exact subject.
#[derive(Default)]
pub struct MockMailbox {
    messages: Mutex<Vec<StoredMessage>>,
    search_failures: Mutex<VecDeque<PollError>>,
    stripped_headers: Mutex<Vec<String>>,
    searches: AtomicUsize,
}

impl std::fmt::Debug for MockMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockMailbox")
            .field("messages", &lock(&self.messages).len())
            .field("searches", &self.searches)
            .finish_non_exhaustive()
    }
}

impl MockMailbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a message in the inbox.
    pub fn insert(&self, subject: impl Into<String>, candidate: CandidateMessage) {
        lock(&self.messages).push(StoredMessage {
            subject: subject.into(),
            candidate,
        });
    }

    /// Fail the next search with `error`.
    pub fn fail_next_search(&self, error: PollError) {
        lock(&self.search_failures).push_back(error);
    }

    /// Drop `header` from every message delivered from now on, the way an
    /// aggressive relay would.
    pub fn strip_header(&self, header: &str) {
        lock(&self.stripped_headers).push(header.to_ascii_lowercase());
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deliver(&self, message: &OutgoingMessage, delay: f64) {
        let stripped = lock(&self.stripped_headers).clone();
        let send_epoch = message
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(SEND_EPOCH_HEADER))
            .and_then(|(_, value)| value.parse::<f64>().ok())
            .unwrap_or_default();

        let headers = message
            .headers
            .iter()
            .filter(|(name, _)| !stripped.contains(&name.to_ascii_lowercase()))
            .cloned();

        let id = format!("mock-{}", self.len() + 1);
        self.insert(
            message.subject.clone(),
            CandidateMessage::new(id, send_epoch + delay, headers),
        );
    }
}

#[async_trait]
impl Mailbox for MockMailbox {
    async fn search(&self, query: &MailboxQuery) -> Result<Vec<String>, PollError> {
        self.searches.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = lock(&self.search_failures).pop_front() {
            return Err(error);
        }

        #[allow(clippy::cast_possible_truncation)]
        let ids = lock(&self.messages)
            .iter()
            .rev()
            .filter(|message| message.subject == query.subject)
            .take(query.max_results as usize)
            .map(|message| message.candidate.provider_message_id.clone())
            .collect();

        Ok(ids)
    }

    async fn fetch_metadata(
        &self,
        message_id: &str,
        _headers: &[&str],
    ) -> Result<CandidateMessage, PollError> {
        lock(&self.messages)
            .iter()
            .find(|message| message.candidate.provider_message_id == message_id)
            .map(|message| message.candidate.clone())
            .ok_or_else(|| PollError::Status {
                status: 404,
                body: format!("message {message_id} not found"),
            })
    }
}

/// A sender that answers from a script of statuses and records every
/// submission.
#[derive(Debug, Default)]
pub struct MockMailSender {
    statuses: Mutex<VecDeque<u16>>,
    submissions: Mutex<Vec<(AccessToken, OutgoingMessage)>>,
    delivery: Option<(Arc<MockMailbox>, f64)>,
}

impl MockMailSender {
    /// Answers 202 unless scripted otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted messages land in `mailbox`, `delay` seconds after their
    /// send-epoch marker.
    #[must_use]
    pub fn delivering_to(mut self, mailbox: Arc<MockMailbox>, delay: f64) -> Self {
        self.delivery = Some((mailbox, delay));
        self
    }

    /// Answer the next submissions with `statuses`, in order.
    #[must_use]
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        lock(&self.statuses).extend(statuses);
        self
    }

    pub fn submissions(&self) -> Vec<(AccessToken, OutgoingMessage)> {
        lock(&self.submissions).clone()
    }
}

#[async_trait]
impl MailSender for MockMailSender {
    async fn submit(
        &self,
        token: &AccessToken,
        message: &OutgoingMessage,
    ) -> Result<SubmitResponse, SendError> {
        lock(&self.submissions).push((token.clone(), message.clone()));
        let status = lock(&self.statuses).pop_front().unwrap_or(ACCEPTED);

        if status == ACCEPTED
            && let Some((mailbox, delay)) = &self.delivery
        {
            mailbox.deliver(message, *delay);
        }

        Ok(SubmitResponse {
            status,
            body: if status == 401 {
                r#"{"error":{"code":"InvalidAuthenticationToken"}}"#.to_string()
            } else {
                String::new()
            },
        })
    }
}
