//! Lock error types

use thiserror::Error;

/// Lock acquisition and release failures.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {name:?} not acquired within wait timeout")]
    Contended { name: String },

    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Result type for lock operations
pub type Result<T> = std::result::Result<T, LockError>;
