//! Correlation markers embedded in every probe message.
//!
//! A probe is recognised on the receiving side by headers it carries, never
//! by its subject. The subject only narrows the provider-side search.
//!
//! | Header                   | Value                                   |
//! |--------------------------|-----------------------------------------|
//! | `X-Probe`                | `true`                                  |
//! | `X-Probe-Test-Id`        | 12 hex chars from a 128-bit source      |
//! | `X-Probe-Send-Epoch`     | integer seconds since the Unix epoch    |
//! | `X-Probe-Message-Id`     | generated RFC 5322 message identifier   |
//! | `X-Probe-Correlation-Id` | same identifier, second copy            |
//!
//! The identifier is written twice because some relays strip unfamiliar
//! headers one at a time.

pub const PROBE_HEADER: &str = "X-Probe";
pub const TEST_ID_HEADER: &str = "X-Probe-Test-Id";
pub const SEND_EPOCH_HEADER: &str = "X-Probe-Send-Epoch";
pub const MESSAGE_ID_HEADERS: [&str; 2] = ["X-Probe-Message-Id", "X-Probe-Correlation-Id"];

/// Every header the receiving side needs to fetch.
pub const MARKER_HEADERS: [&str; 5] = [
    PROBE_HEADER,
    TEST_ID_HEADER,
    SEND_EPOCH_HEADER,
    MESSAGE_ID_HEADERS[0],
    MESSAGE_ID_HEADERS[1],
];

/// Length of a test identifier in hex characters.
pub const TEST_ID_LEN: usize = 12;

/// Generate a fresh test identifier.
///
/// Drawn from a 128-bit random value, never a counter, so identifiers stay
/// unique across process restarts.
#[must_use]
pub fn new_test_id() -> String {
    let entropy: u128 = rand::random();
    hex::encode(&entropy.to_be_bytes()[..TEST_ID_LEN / 2])
}

/// Build a globally unique message identifier scoped by the sender's domain.
///
/// `<probe.{test_id}.{send_epoch}.{random}@{domain}>`
#[must_use]
pub fn message_id(test_id: &str, send_epoch: i64, domain: &str) -> String {
    let suffix: u64 = rand::random();
    format!("<probe.{test_id}.{send_epoch}.{suffix:016x}@{domain}>")
}

/// The domain part of an address, if it has one.
#[must_use]
pub fn domain_of(address: &str) -> Option<&str> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>'))
        .filter(|domain| !domain.is_empty())
}

/// Markers for one probe cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationMarkers {
    pub test_id: String,
    pub send_epoch: i64,
    pub message_id: String,
}

impl CorrelationMarkers {
    /// Derive the markers for a message sent at `send_epoch` from `domain`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        reason = "epoch seconds fit comfortably in an i64"
    )]
    pub fn new(test_id: &str, send_epoch: f64, domain: &str) -> Self {
        let send_epoch = send_epoch.floor() as i64;

        Self {
            test_id: test_id.to_string(),
            send_epoch,
            message_id: message_id(test_id, send_epoch, domain),
        }
    }

    /// The header name/value pairs to attach to the outgoing message.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (PROBE_HEADER.to_string(), "true".to_string()),
            (TEST_ID_HEADER.to_string(), self.test_id.clone()),
            (SEND_EPOCH_HEADER.to_string(), self.send_epoch.to_string()),
        ];
        headers.extend(
            MESSAGE_ID_HEADERS
                .iter()
                .map(|name| ((*name).to_string(), self.message_id.clone())),
        );
        headers
    }
}
