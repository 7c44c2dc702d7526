//! One send → poll → correlate cycle.
//!
//! The lifecycle is an explicit state machine. Transitions are pure: they
//! only record what happened in the [`ProbeCycle`] context. All I/O lives in
//! [`CycleController::run_cycle`], which feeds the machine one event per
//! stage.
//!
//! ```text
//! Idle ──Start──> Sending ──SendFailed──> SendFailed ─────────────┐
//!                    │                                             │
//!                    └──Sent──> Sent ──PollStarted──> Polling      │
//!                                                       │          │
//!                         ┌──────────┬──────────┬───────┴────┐     │
//!                         ▼          ▼          ▼            ▼     │
//!                    Delivered   TimedOut   PollFailed  Interrupted│
//!                         │          │          │            │     │
//!                         └──────────┴────┬─────┴────────────┴─────┘
//!                                         ▼
//!                                      Reported
//! ```
//!
//! An event that makes no sense in the current state leaves the state as it
//! is.

use std::{fmt, sync::Arc, time::Duration};

use tokio::sync::broadcast;
use transit_common::{Clock, Signal, internal, traits::fsm::FiniteStateMachine};

use crate::{
    correlation::{CorrelationMarkers, new_test_id},
    correlator::Latency,
    error::{PollError, ProbeError, SendError},
    poll::{PollAdapter, PollOutcome},
    send::{SendAdapter, subject_for},
};

/// Why a cycle did not produce a latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    SendFailed,
    Auth,
    Timeout,
    PollFailed,
    Interrupted,
}

impl FailureReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SendFailed => "send_failed",
            Self::Auth => "auth",
            Self::Timeout => "timeout",
            Self::PollFailed => "poll_failed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pending,
    Delivered(Latency),
    Failed {
        reason: FailureReason,
        detail: String,
    },
}

impl Outcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    #[must_use]
    pub const fn latency(&self) -> Option<Latency> {
        match self {
            Self::Delivered(latency) => Some(*latency),
            _ => None,
        }
    }

    #[must_use]
    pub const fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Everything known about the cycle in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCycle {
    pub test_id: String,
    pub subject: String,
    pub send_epoch: Option<f64>,
    pub send_status: Option<u16>,
    pub markers: Option<CorrelationMarkers>,
    pub deadline: Option<f64>,
    pub outcome: Outcome,
}

impl ProbeCycle {
    #[must_use]
    pub const fn new(test_id: String, subject: String) -> Self {
        Self {
            test_id,
            subject,
            send_epoch: None,
            send_status: None,
            markers: None,
            deadline: None,
            outcome: Outcome::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Sending,
    Sent,
    SendFailed,
    Polling,
    Delivered,
    TimedOut,
    PollFailed,
    Interrupted,
    Reported,
}

impl CycleState {
    /// States from which only `Reported` is reachable.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::SendFailed | Self::Delivered | Self::TimedOut | Self::PollFailed | Self::Interrupted
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleEvent {
    Start,
    SendSucceeded {
        send_epoch: f64,
        status: u16,
        markers: CorrelationMarkers,
        deadline: f64,
    },
    SendFailed {
        reason: FailureReason,
        status: Option<u16>,
        detail: String,
    },
    PollStarted,
    Matched(Latency),
    TimedOut {
        waited: f64,
    },
    PollFailed {
        reason: FailureReason,
        detail: String,
    },
    Interrupted,
    Reported,
}

impl FiniteStateMachine for CycleState {
    type Input = CycleEvent;
    type Context = ProbeCycle;

    fn transition(self, input: Self::Input, cycle: &mut Self::Context) -> Self {
        match (self, input) {
            (Self::Idle, CycleEvent::Start) => Self::Sending,

            (
                Self::Sending,
                CycleEvent::SendSucceeded {
                    send_epoch,
                    status,
                    markers,
                    deadline,
                },
            ) => {
                cycle.send_epoch = Some(send_epoch);
                cycle.send_status = Some(status);
                cycle.markers = Some(markers);
                cycle.deadline = Some(deadline);
                Self::Sent
            }

            (
                Self::Sending,
                CycleEvent::SendFailed {
                    reason,
                    status,
                    detail,
                },
            ) => {
                cycle.send_status = status;
                cycle.outcome = Outcome::Failed { reason, detail };
                Self::SendFailed
            }

            (Self::Sent, CycleEvent::PollStarted) => Self::Polling,

            (Self::Polling, CycleEvent::Matched(latency)) => {
                cycle.outcome = Outcome::Delivered(latency);
                Self::Delivered
            }

            (Self::Polling, CycleEvent::TimedOut { waited }) => {
                cycle.outcome = Outcome::Failed {
                    reason: FailureReason::Timeout,
                    detail: ProbeError::Timeout(waited).to_string(),
                };
                Self::TimedOut
            }

            (Self::Polling, CycleEvent::PollFailed { reason, detail }) => {
                cycle.outcome = Outcome::Failed { reason, detail };
                Self::PollFailed
            }

            (Self::Sent | Self::Polling, CycleEvent::Interrupted) => {
                cycle.outcome = Outcome::Failed {
                    reason: FailureReason::Interrupted,
                    detail: "shutdown requested while waiting for delivery".to_string(),
                };
                Self::Interrupted
            }

            (state, CycleEvent::Reported) if state.is_terminal() => Self::Reported,

            (state, _) => state,
        }
    }
}

/// What a finished cycle hands to the reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub test_id: String,
    pub outcome: Outcome,
    pub send_status: Option<u16>,
    /// Wall time from cycle start to report.
    pub elapsed: f64,
    /// Epoch at which the cycle finished.
    pub finished_at: f64,
}

impl CycleReport {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        self.outcome.is_delivered()
    }
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub recipient: String,
    pub subject_prefix: String,
    /// How long to wait for the probe after it was accepted.
    pub timeout: Duration,
}

fn classify_send(error: &SendError) -> FailureReason {
    match error {
        SendError::Credential(e) if !e.is_transient() => FailureReason::Auth,
        SendError::Unauthorized { .. } => FailureReason::Auth,
        _ => FailureReason::SendFailed,
    }
}

fn classify_poll(error: PollError) -> (FailureReason, String) {
    let detail = error.to_string();
    match ProbeError::from(error) {
        ProbeError::Auth(_) => (FailureReason::Auth, detail),
        _ => (FailureReason::PollFailed, detail),
    }
}

/// Drives cycles end to end. Never raises: every failure becomes an
/// [`Outcome::Failed`].
#[derive(Debug)]
pub struct CycleController {
    send: SendAdapter,
    poll: PollAdapter,
    clock: Arc<dyn Clock>,
    settings: CycleSettings,
}

impl CycleController {
    pub fn new(
        send: SendAdapter,
        poll: PollAdapter,
        clock: Arc<dyn Clock>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            send,
            poll,
            clock,
            settings,
        }
    }

    pub const fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    pub async fn run_cycle(&self, shutdown: &mut broadcast::Receiver<Signal>) -> CycleReport {
        let started = self.clock.now();
        let test_id = new_test_id();
        let subject = subject_for(&self.settings.subject_prefix, &test_id);
        let mut cycle = ProbeCycle::new(test_id.clone(), subject);

        internal!(
            level = INFO,
            test_id = %test_id,
            recipient = %self.settings.recipient,
            "Starting probe cycle"
        );

        let mut state = CycleState::Idle.transition(CycleEvent::Start, &mut cycle);

        let event = match self
            .send
            .send(&test_id, &self.settings.recipient, &self.settings.subject_prefix)
            .await
        {
            Ok(sent) => {
                internal!(
                    level = INFO,
                    test_id = %test_id,
                    status = sent.status,
                    attempts = sent.attempts,
                    message_id = %sent.markers.message_id,
                    "Probe accepted by the sending provider"
                );

                CycleEvent::SendSucceeded {
                    send_epoch: sent.send_epoch,
                    status: sent.status,
                    markers: sent.markers,
                    deadline: self.clock.now() + self.settings.timeout.as_secs_f64(),
                }
            }
            Err(e) => {
                let reason = classify_send(&e);
                internal!(
                    level = ERROR,
                    test_id = %test_id,
                    status = ?e.status_code(),
                    reason = %reason,
                    error = %e,
                    "Failed to send probe"
                );

                CycleEvent::SendFailed {
                    reason,
                    status: e.status_code(),
                    detail: e.to_string(),
                }
            }
        };
        state = state.transition(event, &mut cycle);

        if state == CycleState::Sent {
            state = state.transition(CycleEvent::PollStarted, &mut cycle);
            let event = self.poll_for(&cycle, shutdown).await;
            state = state.transition(event, &mut cycle);
        }

        state = state.transition(CycleEvent::Reported, &mut cycle);
        debug_assert_eq!(state, CycleState::Reported);

        let finished_at = self.clock.now();
        CycleReport {
            test_id,
            outcome: cycle.outcome,
            send_status: cycle.send_status,
            elapsed: (finished_at - started).max(0.0),
            finished_at,
        }
    }

    async fn poll_for(
        &self,
        cycle: &ProbeCycle,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> CycleEvent {
        let (Some(markers), Some(deadline)) = (cycle.markers.as_ref(), cycle.deadline) else {
            return CycleEvent::PollFailed {
                reason: FailureReason::PollFailed,
                detail: "cycle reached polling without send markers".to_string(),
            };
        };

        match self
            .poll
            .poll(&cycle.subject, markers, deadline, shutdown)
            .await
        {
            Ok(PollOutcome::Matched { candidate, latency }) => {
                internal!(
                    level = INFO,
                    test_id = %cycle.test_id,
                    latency = latency.seconds,
                    source = %latency.source,
                    provider_message_id = %candidate.provider_message_id,
                    "Probe delivered"
                );
                CycleEvent::Matched(latency)
            }
            Ok(PollOutcome::TimedOut { waited, iterations }) => {
                internal!(
                    level = WARN,
                    test_id = %cycle.test_id,
                    waited,
                    iterations,
                    "Probe not received before the deadline"
                );
                CycleEvent::TimedOut { waited }
            }
            Ok(PollOutcome::Interrupted) => CycleEvent::Interrupted,
            Err(e) => {
                let (reason, detail) = classify_poll(e);
                internal!(
                    level = ERROR,
                    test_id = %cycle.test_id,
                    reason = %reason,
                    error = %detail,
                    "Polling the mailbox failed"
                );
                CycleEvent::PollFailed { reason, detail }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{correlator::LatencySource, error::CredentialError};

    fn cycle() -> ProbeCycle {
        ProbeCycle::new("abcd1234".to_string(), "Probe - abcd1234".to_string())
    }

    fn sent() -> CycleEvent {
        CycleEvent::SendSucceeded {
            send_epoch: 1000.0,
            status: 202,
            markers: CorrelationMarkers {
                test_id: "abcd1234".to_string(),
                send_epoch: 1000,
                message_id: "<probe.abcd1234.1000.1@contoso.com>".to_string(),
            },
            deadline: 1300.0,
        }
    }

    fn run(events: Vec<CycleEvent>) -> (CycleState, ProbeCycle) {
        let mut cycle = cycle();
        let state = events
            .into_iter()
            .fold(CycleState::Idle, |state, event| state.transition(event, &mut cycle));
        (state, cycle)
    }

    #[test]
    fn test_delivered_path() {
        let latency = Latency {
            seconds: 37.0,
            source: LatencySource::Authoritative,
        };
        let (state, cycle) = run(vec![
            CycleEvent::Start,
            sent(),
            CycleEvent::PollStarted,
            CycleEvent::Matched(latency),
            CycleEvent::Reported,
        ]);

        assert_eq!(state, CycleState::Reported);
        assert_eq!(cycle.outcome, Outcome::Delivered(latency));
        assert_eq!(cycle.send_status, Some(202));
        assert_eq!(cycle.deadline, Some(1300.0));
    }

    #[test]
    fn test_send_failed_path() {
        let (state, cycle) = run(vec![
            CycleEvent::Start,
            CycleEvent::SendFailed {
                reason: FailureReason::SendFailed,
                status: Some(503),
                detail: "Send rejected with status 503".to_string(),
            },
            // ignored: a failed send never polls
            CycleEvent::PollStarted,
            CycleEvent::Reported,
        ]);

        assert_eq!(state, CycleState::Reported);
        assert_eq!(cycle.outcome.failure_reason(), Some(FailureReason::SendFailed));
        assert_eq!(cycle.send_status, Some(503));
        assert!(cycle.markers.is_none());
    }

    #[test]
    fn test_timeout_path() {
        let (state, cycle) = run(vec![
            CycleEvent::Start,
            sent(),
            CycleEvent::PollStarted,
            CycleEvent::TimedOut { waited: 300.0 },
        ]);

        assert_eq!(state, CycleState::TimedOut);
        assert_eq!(
            cycle.outcome,
            Outcome::Failed {
                reason: FailureReason::Timeout,
                detail: "Message not received within 300 seconds".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_transitions_keep_state() {
        let mut cycle = cycle();

        assert_eq!(
            CycleState::Idle.transition(CycleEvent::Reported, &mut cycle),
            CycleState::Idle
        );
        assert_eq!(
            CycleState::Idle.transition(CycleEvent::Matched(Latency {
                seconds: 1.0,
                source: LatencySource::Estimated,
            }), &mut cycle),
            CycleState::Idle
        );
        assert_eq!(
            CycleState::Sending.transition(CycleEvent::Reported, &mut cycle),
            CycleState::Sending
        );
        assert_eq!(
            CycleState::Reported.transition(CycleEvent::Start, &mut cycle),
            CycleState::Reported
        );
        assert_eq!(cycle.outcome, Outcome::Pending);
    }

    #[test]
    fn test_interrupt_from_polling() {
        let (state, cycle) = run(vec![
            CycleEvent::Start,
            sent(),
            CycleEvent::PollStarted,
            CycleEvent::Interrupted,
            CycleEvent::Reported,
        ]);

        assert_eq!(state, CycleState::Reported);
        assert_eq!(cycle.outcome.failure_reason(), Some(FailureReason::Interrupted));
    }

    #[test]
    fn test_send_error_classification() {
        assert_eq!(
            classify_send(&SendError::Unauthorized {
                body: String::new()
            }),
            FailureReason::Auth
        );
        assert_eq!(
            classify_send(&SendError::Credential(CredentialError::Rejected {
                status: 400,
                error: "invalid_client".to_string(),
                description: String::new(),
            })),
            FailureReason::Auth
        );
        assert_eq!(
            classify_send(&SendError::Credential(CredentialError::Transport(
                "connection refused".to_string()
            ))),
            FailureReason::SendFailed
        );
        assert_eq!(
            classify_send(&SendError::Rejected {
                status: 400,
                body: "ErrorInvalidRecipients".to_string(),
            }),
            FailureReason::SendFailed
        );
    }

    #[test]
    fn test_poll_error_classification() {
        assert_eq!(classify_poll(PollError::Unauthorized).0, FailureReason::Auth);
        assert_eq!(
            classify_poll(PollError::Status {
                status: 403,
                body: "insufficientPermissions".to_string(),
            })
            .0,
            FailureReason::PollFailed
        );
    }

    #[test]
    fn test_failure_reason_names() {
        let names: Vec<&str> = [
            FailureReason::SendFailed,
            FailureReason::Auth,
            FailureReason::Timeout,
            FailureReason::PollFailed,
            FailureReason::Interrupted,
        ]
        .iter()
        .map(|reason| reason.as_str())
        .collect();

        assert_eq!(
            names,
            ["send_failed", "auth", "timeout", "poll_failed", "interrupted"]
        );
    }
}
