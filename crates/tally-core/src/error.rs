//! Error types for the Tally engine and configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::MetricType;

/// Result type alias for aggregation operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors raised while applying an observation.
///
/// None of these leave the registry in a partially-updated state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    #[error("metric {name:?} is a {existing}, cannot record it as a {attempted}")]
    TypeConflict {
        name: String,
        existing: MetricType,
        attempted: MetricType,
    },

    #[error("invalid value {value} for {kind} {name:?}: {reason}")]
    InvalidValue {
        name: String,
        kind: MetricType,
        value: f64,
        reason: &'static str,
    },

    #[error("invalid metric name: {0:?}")]
    InvalidName(String),

    #[error("invalid label name {label:?} on metric {name:?}")]
    InvalidLabel { name: String, label: String },

    #[error("no custom collector configured for raw payload {0:?}")]
    NoCustomCollector(String),

    #[error("custom collector error: {0}")]
    Custom(String),
}

/// Errors raised while loading or validating `tally.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid duration: {0:?}")]
    Duration(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("auth misconfigured: {0}")]
    Auth(String),
}
