//! Rollout strategy contract and result types

use crate::context::RolloutContext;
use crate::error::Result;
use async_trait::async_trait;
use convoy_types::{NodeId, TrafficPool};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Overall outcome of one rollout or rollback call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutStatus {
    /// Every targeted node runs the artifact.
    Succeeded,
    /// The rollout failed and the strategy could not fully restore the
    /// prior state; inconsistent nodes are listed.
    Failed,
    /// The rollout failed and every updated node was restored.
    RolledBack,
}

/// What was attempted on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAction {
    Apply,
    Rollback,
}

/// Per-node record of one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub node_id: NodeId,
    pub action: NodeAction,
    pub success: bool,
    pub error: Option<String>,
}

/// What a strategy reports back to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutResult {
    pub status: RolloutStatus,
    pub node_outcomes: Vec<NodeOutcome>,
    /// Nodes whose rollback failed; flagged in the registry too.
    pub inconsistent: Vec<NodeId>,
    pub elapsed: Duration,
    pub message: Option<String>,
    /// Blue-Green only: the pool that served traffic before the switch, so
    /// an administrative rollback can swap back.
    pub prior_pointer: Option<TrafficPool>,
}

impl RolloutResult {
    pub fn succeeded(node_outcomes: Vec<NodeOutcome>, elapsed: Duration) -> Self {
        Self {
            status: RolloutStatus::Succeeded,
            node_outcomes,
            inconsistent: Vec::new(),
            elapsed,
            message: None,
            prior_pointer: None,
        }
    }

    pub fn no_op(elapsed: Duration) -> Self {
        Self::succeeded(Vec::new(), elapsed).with_message("cluster has no nodes")
    }

    pub fn rolled_back(
        node_outcomes: Vec<NodeOutcome>,
        elapsed: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: RolloutStatus::RolledBack,
            node_outcomes,
            inconsistent: Vec::new(),
            elapsed,
            message: Some(message.into()),
            prior_pointer: None,
        }
    }

    pub fn failed(
        node_outcomes: Vec<NodeOutcome>,
        inconsistent: Vec<NodeId>,
        elapsed: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: RolloutStatus::Failed,
            node_outcomes,
            inconsistent,
            elapsed,
            message: Some(message.into()),
            prior_pointer: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_prior_pointer(mut self, pointer: TrafficPool) -> Self {
        self.prior_pointer = Some(pointer);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RolloutStatus::Succeeded
    }
}

/// The strategy contract.
///
/// `deploy` operates on the node set the context read at creation; nodes
/// added to the cluster later are not included, and nodes removed
/// mid-operation fail their per-node step. Both operations observe
/// cancellation between units of work (nodes, batches, waves) and never
/// start a new unit after cancellation.
#[async_trait]
pub trait RolloutStrategy: Send + Sync {
    /// Roll the context's artifact out to the cluster.
    async fn deploy(
        &self,
        ctx: &RolloutContext,
        cancel: &CancellationToken,
    ) -> Result<RolloutResult>;

    /// Return the cluster to the prior artifact. Used for administrative
    /// rollback and as the pipeline's backstop when `deploy` errored
    /// without cleaning up.
    async fn rollback(
        &self,
        ctx: &RolloutContext,
        cancel: &CancellationToken,
    ) -> Result<RolloutResult>;

    /// Strategy name for logging.
    fn name(&self) -> &str;
}
