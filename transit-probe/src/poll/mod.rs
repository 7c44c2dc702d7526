//! Time-bounded polling of the receiving mailbox.
//!
//! ```text
//!            ┌───────────── transient error / no match ──────────────┐
//!            ▼                                                       │
//! Polling ──> search ──> fetch metadata ──> correlate ──> Matched    │
//!    │                                         │                     │
//!    │                                         └── backoff (5s) ─────┘
//!    ├── now >= deadline ──> TimedOut
//!    └── shutdown during backoff ──> Interrupted
//! ```
//!
//! The deadline is absolute wall-clock time and is never extended. Backoff is
//! fixed; a slow provider costs iterations, not a longer wait.

mod gmail;

use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use transit_common::{Clock, Signal, internal};

pub use gmail::{DEFAULT_GMAIL_BASE, GmailMailbox};

use crate::{
    correlation::{CorrelationMarkers, MARKER_HEADERS},
    correlator::{Correlator, Latency, MatchResult},
    error::PollError,
};

/// Largest page a single search may request.
pub const MAX_PAGE_SIZE: u32 = 10;

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// A message the mailbox search turned up, reduced to what correlation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMessage {
    pub provider_message_id: String,
    /// Provider-assigned receive time, epoch seconds.
    pub received_epoch: f64,
    header_markers: HashMap<String, String>,
}

impl CandidateMessage {
    /// Header names are folded to lowercase; when a header repeats, the first
    /// occurrence wins.
    pub fn new(
        provider_message_id: impl Into<String>,
        received_epoch: f64,
        headers: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut header_markers = HashMap::new();
        for (name, value) in headers {
            header_markers
                .entry(name.to_ascii_lowercase())
                .or_insert(value);
        }

        Self {
            provider_message_id: provider_message_id.into(),
            received_epoch,
            header_markers,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_markers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// What to ask the mailbox for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxQuery {
    pub subject: String,
    pub max_results: u32,
}

impl MailboxQuery {
    pub fn new(subject: impl Into<String>, max_results: u32) -> Self {
        Self {
            subject: subject.into(),
            max_results: max_results.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

/// The receiving mailbox.
#[async_trait]
pub trait Mailbox: Send + Sync + Debug {
    /// Identifiers of recent messages matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// See [`PollError`]; [`PollError::is_transient`] decides whether the poll
    /// loop keeps going.
    async fn search(&self, query: &MailboxQuery) -> Result<Vec<String>, PollError>;

    /// Fetch only `headers` and the receive time of one message.
    ///
    /// # Errors
    ///
    /// See [`PollError`].
    async fn fetch_metadata(
        &self,
        message_id: &str,
        headers: &[&str],
    ) -> Result<CandidateMessage, PollError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Matched {
        candidate: CandidateMessage,
        latency: Latency,
    },
    TimedOut {
        waited: f64,
        iterations: u32,
    },
    Interrupted,
}

#[derive(Debug)]
pub struct PollAdapter {
    mailbox: Arc<dyn Mailbox>,
    correlator: Correlator,
    clock: Arc<dyn Clock>,
    backoff: Duration,
    max_results: u32,
}

impl PollAdapter {
    pub fn new(mailbox: Arc<dyn Mailbox>, clock: Arc<dyn Clock>) -> Self {
        Self {
            mailbox,
            correlator: Correlator::new(clock.clone()),
            clock,
            backoff: DEFAULT_BACKOFF,
            max_results: MAX_PAGE_SIZE,
        }
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Poll until the probe described by `markers` shows up, `deadline`
    /// (epoch seconds) passes, or a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Only non-transient failures escape; everything else is logged and
    /// retried after the backoff.
    pub async fn poll(
        &self,
        subject: &str,
        markers: &CorrelationMarkers,
        deadline: f64,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> Result<PollOutcome, PollError> {
        let query = MailboxQuery::new(subject, self.max_results);
        let poll_start = self.clock.now();
        let mut iterations = 0;

        loop {
            let now = self.clock.now();
            if now >= deadline {
                return Ok(PollOutcome::TimedOut {
                    waited: now - poll_start,
                    iterations,
                });
            }

            iterations += 1;
            match self.iteration(&query, markers, poll_start).await {
                Ok(Some((candidate, latency))) => {
                    return Ok(PollOutcome::Matched { candidate, latency });
                }
                Ok(None) => internal!(
                    level = DEBUG,
                    test_id = %markers.test_id,
                    iteration = iterations,
                    "Probe not yet in the mailbox"
                ),
                Err(e) if e.is_transient() => internal!(
                    level = WARN,
                    test_id = %markers.test_id,
                    iteration = iterations,
                    error = %e,
                    "Transient mailbox failure, backing off"
                ),
                Err(e) => return Err(e),
            }

            let remaining = deadline - self.clock.now();
            if remaining <= 0.0 {
                continue;
            }
            let wait = self.backoff.min(Duration::from_secs_f64(remaining));

            tokio::select! {
                biased;

                signal = shutdown.recv() => match signal {
                    // Nobody can signal any more; keep polling until the deadline.
                    Err(RecvError::Closed) => self.clock.sleep(wait).await,
                    Ok(Signal::Shutdown) | Err(RecvError::Lagged(_)) => {
                        internal!(
                            level = INFO,
                            test_id = %markers.test_id,
                            "Shutdown requested, abandoning poll"
                        );
                        return Ok(PollOutcome::Interrupted);
                    }
                },
                () = self.clock.sleep(wait) => {}
            }
        }
    }

    async fn iteration(
        &self,
        query: &MailboxQuery,
        markers: &CorrelationMarkers,
        poll_start: f64,
    ) -> Result<Option<(CandidateMessage, Latency)>, PollError> {
        let ids = self.mailbox.search(query).await?;
        let mut failed = 0;
        let mut last_failure = None;

        for id in ids {
            let candidate = match self.mailbox.fetch_metadata(&id, &MARKER_HEADERS).await {
                Ok(candidate) => candidate,
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    // One unreadable message must not hide the rest of the page.
                    internal!(
                        level = WARN,
                        test_id = %markers.test_id,
                        provider_message_id = %id,
                        error = %e,
                        "Could not fetch candidate, skipping"
                    );
                    failed += 1;
                    last_failure = Some((id, e));
                    continue;
                }
            };

            match self.correlator.match_candidate(&candidate, markers, poll_start) {
                MatchResult::Matched(latency) => return Ok(Some((candidate, latency))),
                MatchResult::NoMatch => internal!(
                    level = DEBUG,
                    test_id = %markers.test_id,
                    provider_message_id = %id,
                    "Candidate does not carry this probe's markers"
                ),
            }
        }

        match last_failure {
            Some((message_id, source)) => Err(PollError::Candidates {
                failed,
                message_id,
                source: Box::new(source),
            }),
            None => Ok(None),
        }
    }
}
