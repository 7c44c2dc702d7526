//! Error types for metrics operations

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while pushing measurements
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The sink could not be reached or the connection dropped
    #[error("Metrics sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink did not answer in time
    #[error("Metrics sink did not answer within {0:?}")]
    Timeout(Duration),

    /// The sink answered with something that is not a valid response frame
    #[error("Metrics sink protocol error: {0}")]
    Protocol(String),

    /// The sink answered, but refused the data
    #[error("Metrics sink rejected the data: {0}")]
    Rejected(String),

    /// Payload could not be encoded or decoded
    #[error("Metrics payload error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// OpenTelemetry SDK error
    #[error("OpenTelemetry error: {0}")]
    OpenTelemetry(String),
}

impl MetricsError {
    /// Returns `true` if the same push might succeed on the next cycle.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_) | Self::OpenTelemetry(_))
    }
}
