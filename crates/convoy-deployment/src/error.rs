//! Deployment error types
//!
//! Per-node failures and health degradation are not errors at this level:
//! strategies fold them into the rollout result. Errors are reserved for
//! infrastructure faults the strategy cannot absorb.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("registry error: {0}")]
    Registry(#[from] convoy_registry::RegistryError),

    #[error("metrics error: {0}")]
    Metrics(#[from] convoy_metrics::MetricsError),

    #[error("internal deployment error: {0}")]
    Internal(String),
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, DeploymentError>;
