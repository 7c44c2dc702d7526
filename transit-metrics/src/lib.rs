//! Push-only metrics for the transit delivery probe
//!
//! Each probe cycle ends in exactly two measurements, pushed to one sink:
//!
//! ```text
//! cycle outcome → MetricsReporter → Zabbix trapper (sender protocol, TCP)
//!                                 → OpenTelemetry Collector (OTLP/HTTP)
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use transit_metrics::{DeliverySample, MetricsConfig, MetricsReporter};
//!
//! # async fn example(config: &MetricsConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let reporter = MetricsReporter::from_config(Some(config))?;
//!
//! reporter
//!     .report(
//!         "3f9a0c1d27be",
//!         &DeliverySample::Delivered { seconds: 37.0, estimated: false },
//!         None,
//!     )
//!     .await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod otlp;
mod reporter;
mod sink;
pub mod zabbix;

pub use config::{ItemKeys, MetricsConfig, SinkConfig};
pub use error::MetricsError;
pub use otlp::OtlpSink;
pub use reporter::{DeliverySample, FAILED_TIME, MetricsReporter};
pub use sink::{MemorySink, Measurement, MetricsSink, PushSummary};
pub use zabbix::ZabbixSink;
