//! Metrics error types

use thiserror::Error;

/// Metrics read failures.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("counter source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Result type for metrics operations
pub type Result<T> = std::result::Result<T, MetricsError>;
