//! Engine error types

use convoy_types::{ExecutionId, ExecutionStatus, ValidationError};
use thiserror::Error;

/// Failures surfaced to the API collaborator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid deployment request: {0}")]
    Validation(#[from] ValidationError),

    #[error("submission queue is full; retry after a delay")]
    Backpressure,

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("execution not found: {0}")]
    NotFound(ExecutionId),

    #[error("execution {0} is tracked but has no running pipeline in this instance")]
    NotRunning(ExecutionId),

    #[error("execution {0} already rolled back")]
    AlreadyRolledBack(ExecutionId),

    #[error("execution {execution_id} ended {status}; nothing to roll back")]
    NotRollbackable {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },

    #[error("rollout error: {0}")]
    Deployment(#[from] convoy_deployment::DeploymentError),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
