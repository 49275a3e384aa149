//! Domain-specific error types for flowlens.
//!
//! Uses `thiserror` for ergonomic error definitions that integrate
//! with the broader `anyhow` error handling strategy.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading capture exports or mapping files.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record in '{path}': {source}")]
    MalformedRecord {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Record {record} in '{path}' has an unrepresentable timestamp: {value}")]
    BadTimestamp {
        path: PathBuf,
        record: u64,
        value: f64,
    },
}

/// Errors raised when a detector is invoked with invalid parameters.
///
/// Rejected synchronously, before any computation begins, so a misconfigured
/// run fails fast with a message naming the bad parameter.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("interval must be a positive duration, got {0}")]
    NonPositiveInterval(String),

    #[error("rolling window must be at least 1")]
    ZeroWindow,

    #[error("{name} must be positive, got {value}")]
    NonPositiveThreshold { name: &'static str, value: f64 },

    #[error("percentile must be in (0, 1), got {0}")]
    InvalidPercentile(f64),

    #[error("top_n must be at least 1")]
    ZeroTopN,

    #[error("unparseable duration '{value}': {reason}")]
    BadDuration { value: String, reason: String },
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
