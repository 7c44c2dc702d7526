//! Metrics configuration

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use transit_common::error::ConfigError;

use crate::{MetricsError, MetricsSink, OtlpSink, ZabbixSink, otlp, zabbix};

/// Where measurements go.
#[derive(Debug, Clone, Deserialize)]
pub enum SinkConfig {
    /// Zabbix trapper items via the sender protocol
    Zabbix {
        server: String,
        #[serde(default = "default_zabbix_port")]
        port: u16,
        #[serde(default = "default_sink_timeout_secs")]
        timeout_secs: u64,
    },

    /// OpenTelemetry gauges pushed over OTLP/HTTP
    Otlp {
        #[serde(default = "default_otlp_endpoint")]
        endpoint: String,
    },
}

/// Item keys for the two per-cycle measurements.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemKeys {
    #[serde(default = "default_success_key")]
    pub success: String,
    #[serde(default = "default_time_key")]
    pub time: String,
}

impl Default for ItemKeys {
    fn default() -> Self {
        Self {
            success: default_success_key(),
            time: default_time_key(),
        }
    }
}

/// Configuration for metrics reporting
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// When disabled, reporting is a no-op.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Logical host the items belong to.
    pub host: String,

    pub sink: SinkConfig,

    #[serde(default)]
    pub keys: ItemKeys,
}

const fn default_enabled() -> bool {
    true
}

const fn default_zabbix_port() -> u16 {
    zabbix::DEFAULT_PORT
}

const fn default_sink_timeout_secs() -> u64 {
    10
}

fn default_otlp_endpoint() -> String {
    otlp::DEFAULT_ENDPOINT.to_string()
}

fn default_success_key() -> String {
    "email.delivery.success".to_string()
}

fn default_time_key() -> String {
    "email.delivery.time".to_string()
}

impl MetricsConfig {
    /// # Errors
    ///
    /// Returns the first missing or invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("metrics.host"));
        }

        if self.keys.success.trim().is_empty() || self.keys.time.trim().is_empty() {
            return Err(ConfigError::invalid("metrics.keys", "item keys must not be empty"));
        }

        match &self.sink {
            SinkConfig::Zabbix {
                server,
                port,
                timeout_secs,
            } => {
                if server.trim().is_empty() {
                    return Err(ConfigError::MissingField("metrics.sink.server"));
                }
                if *port == 0 {
                    return Err(ConfigError::invalid("metrics.sink.port", "must not be 0"));
                }
                if *timeout_secs == 0 {
                    return Err(ConfigError::invalid(
                        "metrics.sink.timeout_secs",
                        "must be greater than 0",
                    ));
                }
            }
            SinkConfig::Otlp { endpoint } => {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(ConfigError::invalid(
                        "metrics.sink.endpoint",
                        format!("{endpoint} is not an http(s) URL"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Build the configured sink, or `None` when reporting is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the OTLP exporter cannot be initialized.
    pub fn build_sink(&self) -> Result<Option<Arc<dyn MetricsSink>>, MetricsError> {
        if !self.enabled {
            return Ok(None);
        }

        let sink: Arc<dyn MetricsSink> = match &self.sink {
            SinkConfig::Zabbix {
                server,
                port,
                timeout_secs,
            } => Arc::new(ZabbixSink::new(
                server,
                *port,
                Duration::from_secs(*timeout_secs),
            )),
            SinkConfig::Otlp { endpoint } => Arc::new(OtlpSink::new(endpoint)?),
        };

        Ok(Some(sink))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn zabbix(server: &str) -> MetricsConfig {
        MetricsConfig {
            enabled: true,
            host: "mail-probe".to_string(),
            sink: SinkConfig::Zabbix {
                server: server.to_string(),
                port: default_zabbix_port(),
                timeout_secs: default_sink_timeout_secs(),
            },
            keys: ItemKeys::default(),
        }
    }

    #[test]
    fn test_default_keys() {
        let keys = ItemKeys::default();
        assert_eq!(keys.success, "email.delivery.success");
        assert_eq!(keys.time, "email.delivery.time");
    }

    #[test]
    fn test_validation() {
        assert!(zabbix("zabbix.internal").validate().is_ok());

        assert_eq!(
            zabbix(" ").validate().unwrap_err().to_string(),
            "Missing required field: metrics.sink.server"
        );

        let no_host = MetricsConfig {
            host: String::new(),
            ..zabbix("zabbix.internal")
        };
        assert!(no_host.validate().is_err());

        let disabled = MetricsConfig {
            enabled: false,
            host: String::new(),
            ..zabbix("")
        };
        assert!(disabled.validate().is_ok());

        let otlp = MetricsConfig {
            sink: SinkConfig::Otlp {
                endpoint: "localhost:4318".to_string(),
            },
            ..zabbix("zabbix.internal")
        };
        assert!(otlp.validate().is_err());
    }

    #[test]
    fn test_build_sink() {
        let sink = zabbix("zabbix.internal").build_sink().unwrap().unwrap();
        assert_eq!(sink.name(), "zabbix");

        let disabled = MetricsConfig {
            enabled: false,
            ..zabbix("zabbix.internal")
        };
        assert!(disabled.build_sink().unwrap().is_none());
    }
}
