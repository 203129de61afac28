//! Tracker error types

use convoy_types::ExecutionId;
use thiserror::Error;

/// Tracker operation failures.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("close-out lock contended for {0}; retry the whole close-out")]
    CloseOutContended(ExecutionId),

    #[error("tracker store error: {0}")]
    Store(String),
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
