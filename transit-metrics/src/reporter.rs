//! Shapes cycle outcomes into measurements and pushes them.
//!
//! Every cycle produces exactly two measurements: success (1/0) and delivery
//! time (seconds, or -1 on failure). Sink failures are logged and swallowed.

use std::sync::Arc;

use transit_common::internal;

use crate::{
    Measurement, MetricsConfig, MetricsError, MetricsSink, PushSummary, config::ItemKeys,
};

/// Delivery time reported for a failed cycle.
pub const FAILED_TIME: f64 = -1.0;

/// The outcome of one cycle, as far as metrics are concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliverySample {
    Delivered { seconds: f64, estimated: bool },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct MetricsReporter {
    sink: Option<Arc<dyn MetricsSink>>,
    host: String,
    keys: ItemKeys,
}

impl MetricsReporter {
    pub fn new(sink: Arc<dyn MetricsSink>, host: impl Into<String>, keys: ItemKeys) -> Self {
        Self {
            sink: Some(sink),
            host: host.into(),
            keys,
        }
    }

    /// A reporter that never pushes anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sink: None,
            host: String::new(),
            keys: ItemKeys::default(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the configured sink cannot be built.
    pub fn from_config(config: Option<&MetricsConfig>) -> Result<Self, MetricsError> {
        let Some(config) = config else {
            internal!(level = INFO, "Metrics reporting is not configured");
            return Ok(Self::disabled());
        };

        match config.build_sink()? {
            Some(sink) => {
                internal!(
                    level = INFO,
                    sink = sink.name(),
                    host = %config.host,
                    "Metrics reporting enabled"
                );
                Ok(Self::new(sink, config.host.clone(), config.keys.clone()))
            }
            None => {
                internal!(level = INFO, "Metrics reporting is disabled");
                Ok(Self::disabled())
            }
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// The two measurements describing `sample`.
    #[must_use]
    pub fn measurements(&self, sample: &DeliverySample, clock: Option<i64>) -> [Measurement; 2] {
        let (success, time) = match sample {
            DeliverySample::Delivered { seconds, estimated } => (
                Measurement::new(&self.host, &self.keys.success, 1.0),
                Measurement::new(&self.host, &self.keys.time, *seconds).tagged(
                    "source",
                    if *estimated { "estimated" } else { "authoritative" },
                ),
            ),
            DeliverySample::Failed { reason } => (
                Measurement::new(&self.host, &self.keys.success, 0.0),
                Measurement::new(&self.host, &self.keys.time, FAILED_TIME)
                    .tagged("reason", reason.as_str()),
            ),
        };

        match clock {
            Some(clock) => [success.at(clock), time.at(clock)],
            None => [success, time],
        }
    }

    /// Push the measurements for one cycle. Never fails.
    pub async fn report(
        &self,
        test_id: &str,
        sample: &DeliverySample,
        clock: Option<i64>,
    ) -> Option<PushSummary> {
        let sink = self.sink.as_ref()?;

        if let DeliverySample::Delivered {
            seconds,
            estimated: true,
        } = sample
        {
            internal!(
                level = WARN,
                test_id,
                latency = seconds,
                "Reporting an estimated delivery time"
            );
        }

        let measurements = self.measurements(sample, clock);

        match sink.push(&measurements).await {
            Ok(summary) => {
                if summary.failed > 0 {
                    internal!(
                        level = WARN,
                        test_id,
                        sink = sink.name(),
                        processed = summary.processed,
                        failed = summary.failed,
                        "Metrics sink refused some items"
                    );
                } else {
                    internal!(
                        level = DEBUG,
                        test_id,
                        sink = sink.name(),
                        processed = summary.processed,
                        "Metrics pushed"
                    );
                }
                Some(summary)
            }
            Err(e) => {
                internal!(
                    level = ERROR,
                    test_id,
                    sink = sink.name(),
                    transient = e.is_transient(),
                    error = %e,
                    "Failed to push metrics"
                );
                None
            }
        }
    }

    /// Release the sink. Failures are logged.
    pub async fn shutdown(&self) {
        let Some(sink) = &self.sink else {
            return;
        };

        match sink.shutdown().await {
            Ok(()) => internal!(level = DEBUG, sink = sink.name(), "Metrics sink closed"),
            Err(e) => internal!(
                level = WARN,
                sink = sink.name(),
                error = %e,
                "Failed to close metrics sink"
            ),
        }
    }
}
