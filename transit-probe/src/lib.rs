//! Delivery probe engine.
//!
//! A probe cycle sends a uniquely marked message through one provider,
//! polls another provider's mailbox until the message turns up (or a
//! deadline passes), and derives the delivery latency from the markers:
//! - `credential`: owned bearer-token caches and the OAuth2 exchanges behind them
//! - `correlation`: test identifiers and the headers that carry them
//! - `send` / `poll`: provider seams plus the Graph and Gmail implementations
//! - `correlator`: the match decision and latency derivation
//! - `cycle`: the state machine tying it all together

pub mod config;
pub mod correlation;
pub mod correlator;
pub mod credential;
pub mod cycle;
pub mod error;
pub mod poll;
pub mod send;
pub mod testing;

pub use config::{MonitoringConfig, ReceiverConfig, SenderConfig};
pub use correlation::{CorrelationMarkers, new_test_id};
pub use correlator::{Correlator, Latency, LatencySource, MatchResult};
pub use credential::{AccessToken, CredentialCache, TokenGrant, TokenProvider};
pub use cycle::{CycleController, CycleReport, CycleSettings, FailureReason, Outcome};
pub use error::{CredentialError, PollError, ProbeError, SendError};
pub use poll::{CandidateMessage, Mailbox, MailboxQuery, PollAdapter, PollOutcome};
pub use send::{MailSender, OutgoingMessage, SendAdapter, SentProbe, SubmitResponse};
