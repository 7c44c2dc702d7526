//! Top-level configuration file.
//!
//! ```text
//! (
//!     monitoring: (timeout_secs: 300, test_interval_secs: 60),
//!     sender: (
//!         tenant_id: "${O365_TENANT_ID}",
//!         client_id: "${O365_CLIENT_ID}",
//!         client_secret: "${O365_CLIENT_SECRET}",
//!         sender_email: "monitor@contoso.com",
//!     ),
//!     receiver: (recipient_email: "probe@gmail.com"),
//!     metrics: (host: "mail-probe", sink: Zabbix(server: "zabbix.internal")),
//! )
//! ```

use std::path::{Path, PathBuf};

use ron::extensions::Extensions;
use serde::Deserialize;
use transit_common::{config::substitute, error::ConfigError};
use transit_metrics::MetricsConfig;
use transit_probe::{MonitoringConfig, ReceiverConfig, SenderConfig};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TRANSIT_CONFIG";

/// Searched in order when neither `--config` nor [`CONFIG_ENV`] is given.
pub const DEFAULT_PATHS: [&str; 2] = ["./transit.config.ron", "/etc/transit/transit.config.ron"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitConfig {
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    pub sender: SenderConfig,

    pub receiver: ReceiverConfig,

    /// Absent means no metrics are pushed.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

impl TransitConfig {
    /// Read, template, parse and validate the file at `path`.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]: the file cannot be read, a required environment
    /// variable is unset, the RON is malformed or a setting is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse_with(&content, |name| std::env::var(name).ok())
    }

    /// Parse configuration text, resolving `${VAR}` references through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`TransitConfig::load`].
    pub fn parse_with<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = substitute(content, lookup)?;

        let config: Self = ron::Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.monitoring.validate()?;
        self.sender.validate()?;
        self.receiver.validate()?;

        if let Some(metrics) = &self.metrics {
            metrics.validate()?;
        }

        Ok(())
    }
}

/// Find the configuration file using the following precedence:
/// 1. `--config PATH`
/// 2. `TRANSIT_CONFIG` environment variable
/// 3. ./transit.config.ron (current working directory)
/// 4. /etc/transit/transit.config.ron (system-wide config)
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] if an explicit path does not exist or
/// none of the default locations do.
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let defaults = DEFAULT_PATHS.map(PathBuf::from);
    locate(explicit, std::env::var(CONFIG_ENV).ok(), &defaults)
}

fn locate(
    explicit: Option<&Path>,
    from_env: Option<String>,
    defaults: &[PathBuf],
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::NotFound(format!(
            "  - {} (--config)",
            path.display()
        )));
    }

    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::NotFound(format!(
            "  - {} ({CONFIG_ENV})",
            path.display()
        )));
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::NotFound(format!(
        "  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )))
}
