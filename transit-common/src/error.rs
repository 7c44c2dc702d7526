//! Error types shared across the transit crates.
//!
//! Only configuration problems live here: they are the one class of error
//! that is fatal to the whole process rather than to a single probe cycle.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A `${VAR}` reference names a variable that is not set and has no default.
    #[error("Environment variable {0} is required but not set")]
    MissingVariable(String),

    /// A `${` was opened but never closed.
    #[error("Unterminated variable reference at offset {0}")]
    UnterminatedVariable(usize),

    /// A required configuration field is missing or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A configuration value is invalid.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// The configuration file could not be read.
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// No configuration file could be located.
    #[error("No configuration file found. Tried:\n{0}")]
    NotFound(String),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
