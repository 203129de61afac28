//! Approval error types

use convoy_types::{ApprovalId, ApprovalStatus, ExecutionId};
use thiserror::Error;

/// Approval gate failures.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("no approval found for {0}")]
    NotFoundByExecution(ExecutionId),

    #[error("approval not found: {0}")]
    NotFound(ApprovalId),

    #[error("approval {approval_id} already resolved as {status}")]
    AlreadyResolved {
        approval_id: ApprovalId,
        status: ApprovalStatus,
    },

    #[error("approval transition lock contended for {0}")]
    LockContention(ApprovalId),

    #[error("await cancelled")]
    Cancelled,

    #[error("approval store error: {0}")]
    Store(String),
}

/// Result type for approval operations
pub type Result<T> = std::result::Result<T, ApprovalError>;
