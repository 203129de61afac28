//! Registry error types

use convoy_types::NodeId;
use thiserror::Error;

/// Registry and node-operation failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node {0} was removed during the operation")]
    NodeGone(NodeId),

    #[error("node {0} has no previous artifact to roll back to")]
    NoPreviousArtifact(NodeId),

    #[error("apply failed on node {node_id}: {reason}")]
    ApplyFailed { node_id: NodeId, reason: String },

    #[error("rollback failed on node {node_id}: {reason}")]
    RollbackFailed { node_id: NodeId, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal registry error: {0}")]
    Internal(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
