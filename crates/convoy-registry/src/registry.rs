//! Cluster registry capability trait

use crate::error::Result;
use async_trait::async_trait;
use convoy_types::{
    ArtifactDescriptor, ClusterStatus, Environment, HealthCounters, Node, NodeId, TrafficPool,
};
use tokio_util::sync::CancellationToken;

/// The cluster registry capability.
///
/// One cluster per environment; nodes are owned by their cluster and
/// mutated only through these operations. `list_nodes` is copy-on-read: a
/// returned set is a snapshot, and strategies operate on the set they read
/// at start.
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// Register a node into its environment's cluster.
    async fn register_node(&self, node: Node) -> Result<NodeId>;

    /// Remove a node. In-flight operations against it fail with `NodeGone`.
    async fn deregister_node(&self, node_id: &NodeId) -> Result<bool>;

    async fn get_node(&self, node_id: &NodeId) -> Result<Option<Node>>;

    /// Snapshot of the environment's node set.
    async fn list_nodes(&self, environment: Environment) -> Result<Vec<Node>>;

    /// Record a heartbeat with fresh counters.
    async fn heartbeat(&self, node_id: &NodeId, counters: HealthCounters) -> Result<()>;

    /// Install an artifact on a node under its per-node lock.
    ///
    /// Idempotent: re-applying the currently installed artifact is a no-op
    /// success. Otherwise the node's current artifact becomes its previous
    /// artifact before the new one is recorded.
    async fn apply_artifact(
        &self,
        node_id: &NodeId,
        artifact: &ArtifactDescriptor,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Restore a node's previous artifact under its per-node lock. Fails
    /// when there is no previous artifact.
    async fn rollback_artifact(&self, node_id: &NodeId, cancel: &CancellationToken) -> Result<()>;

    /// Flag a node whose rollback failed for operator attention.
    async fn mark_inconsistent(&self, node_id: &NodeId) -> Result<()>;

    /// Operator action: clear the inconsistent flag after manual repair.
    async fn clear_inconsistent(&self, node_id: &NodeId) -> Result<()>;

    /// Which pool currently serves traffic for the environment.
    async fn traffic_pointer(&self, environment: Environment) -> Result<TrafficPool>;

    /// Atomically swap the serving pool; returns the prior pointer so a
    /// later rollback can swap back.
    async fn switch_traffic(
        &self,
        environment: Environment,
        to: TrafficPool,
    ) -> Result<TrafficPool>;

    /// Aggregate health for the environment's cluster.
    async fn cluster_status(&self, environment: Environment) -> Result<ClusterStatus>;
}
