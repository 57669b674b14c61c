//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration parsing and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while building a policy or loading the daemon config.
///
/// A policy that fails here never reaches evaluation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required key: {0}")]
    MissingKey(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("conflicting options: {0}")]
    Conflict(String),

    #[error("invalid duration {0:?} (expected e.g. \"250ms\", \"5s\", \"1m\")")]
    InvalidDuration(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("scaler {name:?}: {source}")]
    Scaler {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("duplicate scaler name: {0}")]
    DuplicateScaler(String),
}
