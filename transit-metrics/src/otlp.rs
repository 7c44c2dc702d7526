//! OTLP metrics sink
//!
//! Each item key becomes an `f64` gauge; the logical host and the measurement
//! tags become attributes. The meter provider is flushed after every push so
//! a cycle's values leave the process before the next cycle starts.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use opentelemetry::{
    KeyValue,
    metrics::{Gauge, Meter, MeterProvider as _},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, metrics::SdkMeterProvider};

use crate::{Measurement, MetricsError, MetricsSink, PushSummary};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:4318/v1/metrics";

/// Build a provider that pushes to `endpoint` over OTLP/HTTP.
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be initialized.
pub fn init_otlp_exporter(endpoint: &str) -> Result<SdkMeterProvider, MetricsError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| MetricsError::OpenTelemetry(e.to_string()))?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter).build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(Resource::builder().with_service_name("transit").build())
        .build())
}

pub struct OtlpSink {
    provider: SdkMeterProvider,
    meter: Meter,
    gauges: DashMap<String, Gauge<f64>>,
}

impl fmt::Debug for OtlpSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtlpSink")
            .field("gauges", &self.gauges.len())
            .finish_non_exhaustive()
    }
}

impl OtlpSink {
    /// # Errors
    ///
    /// Returns an error if the OTLP exporter cannot be initialized.
    pub fn new(endpoint: &str) -> Result<Self, MetricsError> {
        init_otlp_exporter(endpoint).map(Self::with_provider)
    }

    /// Use an already configured provider.
    pub fn with_provider(provider: SdkMeterProvider) -> Self {
        let meter = provider.meter("transit");
        Self {
            provider,
            meter,
            gauges: DashMap::new(),
        }
    }

    fn gauge(&self, key: &str) -> Gauge<f64> {
        self.gauges
            .entry(key.to_string())
            .or_insert_with(|| self.meter.f64_gauge(key.to_string()).build())
            .clone()
    }

}

#[async_trait]
impl MetricsSink for OtlpSink {
    async fn push(&self, measurements: &[Measurement]) -> Result<PushSummary, MetricsError> {
        for measurement in measurements {
            let mut attributes = vec![KeyValue::new("host", measurement.host.clone())];
            attributes.extend(
                measurement
                    .tags
                    .iter()
                    .map(|(name, value)| KeyValue::new(name.clone(), value.clone())),
            );

            self.gauge(&measurement.key)
                .record(measurement.value, &attributes);
        }

        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || provider.force_flush())
            .await
            .map_err(|e| MetricsError::OpenTelemetry(e.to_string()))?
            .map_err(|e| MetricsError::OpenTelemetry(e.to_string()))?;

        let total = measurements.len() as u64;
        Ok(PushSummary {
            processed: total,
            failed: 0,
            total,
        })
    }

    fn name(&self) -> &'static str {
        "otlp"
    }

    /// Export whatever is pending and stop the exporter.
    async fn shutdown(&self) -> Result<(), MetricsError> {
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .map_err(|e| MetricsError::OpenTelemetry(e.to_string()))?
            .map_err(|e| MetricsError::OpenTelemetry(e.to_string()))
    }
}
