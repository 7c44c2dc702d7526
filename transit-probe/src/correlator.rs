//! Deciding whether a received message is the probe we sent, and how long it
//! took to get there.

use std::{fmt, sync::Arc};

use transit_common::{Clock, internal};

use crate::{
    correlation::{CorrelationMarkers, MESSAGE_ID_HEADERS, PROBE_HEADER, SEND_EPOCH_HEADER, TEST_ID_HEADER},
    poll::CandidateMessage,
};

/// Where a latency figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencySource {
    /// Provider receive time minus the send-epoch marker.
    Authoritative,
    /// Time since polling started; the send-epoch marker was unusable.
    Estimated,
}

impl LatencySource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authoritative => "authoritative",
            Self::Estimated => "estimated",
        }
    }
}

impl fmt::Display for LatencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Latency {
    /// Never negative.
    pub seconds: f64,
    pub source: LatencySource,
}

impl Latency {
    #[must_use]
    pub const fn is_estimated(&self) -> bool {
        matches!(self.source, LatencySource::Estimated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult {
    NoMatch,
    Matched(Latency),
}

#[derive(Debug, Clone)]
pub struct Correlator {
    clock: Arc<dyn Clock>,
}

impl Correlator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Match `candidate` against the markers of the probe in flight.
    ///
    /// Only the probe flag and the test identifier decide a match; the
    /// subject line is never consulted.
    pub fn match_candidate(
        &self,
        candidate: &CandidateMessage,
        expected: &CorrelationMarkers,
        poll_start: f64,
    ) -> MatchResult {
        let is_probe = candidate
            .header(PROBE_HEADER)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));

        if !is_probe {
            return MatchResult::NoMatch;
        }

        if candidate.header(TEST_ID_HEADER).map(str::trim) != Some(expected.test_id.as_str()) {
            return MatchResult::NoMatch;
        }

        self.check_message_id(candidate, expected);

        let latency = match candidate
            .header(SEND_EPOCH_HEADER)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|epoch| epoch.is_finite())
        {
            Some(send_epoch) => Latency {
                seconds: (candidate.received_epoch - send_epoch).max(0.0),
                source: LatencySource::Authoritative,
            },
            None => {
                let seconds = (self.clock.now() - poll_start).max(0.0);
                internal!(
                    level = WARN,
                    test_id = %expected.test_id,
                    provider_message_id = %candidate.provider_message_id,
                    latency = seconds,
                    "Send epoch marker missing or unparsable, latency estimated from poll start"
                );
                Latency {
                    seconds,
                    source: LatencySource::Estimated,
                }
            }
        };

        MatchResult::Matched(latency)
    }

    fn check_message_id(&self, candidate: &CandidateMessage, expected: &CorrelationMarkers) {
        let found = MESSAGE_ID_HEADERS
            .iter()
            .find_map(|name| candidate.header(name));

        match found {
            Some(id) if id.trim() == expected.message_id => {
                internal!(
                    level = DEBUG,
                    test_id = %expected.test_id,
                    "Message identifier confirmed"
                );
            }
            Some(id) => {
                internal!(
                    level = WARN,
                    test_id = %expected.test_id,
                    expected = %expected.message_id,
                    found = %id,
                    "Message identifier differs from the one sent"
                );
            }
            None => {
                internal!(
                    level = DEBUG,
                    test_id = %expected.test_id,
                    "Message identifier headers were stripped in transit"
                );
            }
        }
    }
}
