//! In-memory cluster registry
//!
//! Node I/O is simulated through [`ApplyBehavior`] so tests can script
//! per-node latencies and failures without a fleet.

use crate::error::{RegistryError, Result};
use crate::registry::ClusterRegistry;
use async_trait::async_trait;
use chrono::Utc;
use convoy_metrics::{CounterSource, MetricsError};
use convoy_types::{
    ArtifactDescriptor, ClusterStatus, Environment, HealthCounters, HeartbeatConfig, Node, NodeId,
    NodeHealthConfig, TrafficPool,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Node-side apply capability.
///
/// The registry calls through this for the actual artifact installation;
/// the default simulates I/O with a fixed latency. Any idempotent retry
/// policy lives behind this seam, not in the orchestration core.
#[async_trait]
pub trait ApplyBehavior: Send + Sync {
    /// Install `artifact` on `node`. `Err` carries a node-side reason.
    async fn apply(
        &self,
        node: &Node,
        artifact: &ArtifactDescriptor,
    ) -> std::result::Result<(), String>;

    /// Restore the previous artifact on `node`.
    async fn rollback(&self, node: &Node) -> std::result::Result<(), String>;
}

/// Default behavior: sleep the configured latency, then succeed.
pub struct SimulatedApply {
    latency: Duration,
}

impl SimulatedApply {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for SimulatedApply {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl ApplyBehavior for SimulatedApply {
    async fn apply(
        &self,
        _node: &Node,
        _artifact: &ArtifactDescriptor,
    ) -> std::result::Result<(), String> {
        tokio::time::sleep(self.latency).await;
        Ok(())
    }

    async fn rollback(&self, _node: &Node) -> std::result::Result<(), String> {
        tokio::time::sleep(self.latency).await;
        Ok(())
    }
}

/// In-memory registry for single-instance runs and tests.
pub struct InMemoryClusterRegistry {
    nodes: DashMap<NodeId, Node>,
    /// Per-node logical locks held for the duration of apply/rollback.
    node_locks: DashMap<NodeId, Arc<Mutex<()>>>,
    pointers: DashMap<Environment, TrafficPool>,
    behavior: Arc<dyn ApplyBehavior>,
    heartbeat_config: HeartbeatConfig,
    health_config: NodeHealthConfig,
}

impl InMemoryClusterRegistry {
    pub fn new(heartbeat_config: HeartbeatConfig, health_config: NodeHealthConfig) -> Self {
        Self::with_behavior(
            heartbeat_config,
            health_config,
            Arc::new(SimulatedApply::default()),
        )
    }

    pub fn with_behavior(
        heartbeat_config: HeartbeatConfig,
        health_config: NodeHealthConfig,
        behavior: Arc<dyn ApplyBehavior>,
    ) -> Self {
        Self {
            nodes: DashMap::new(),
            node_locks: DashMap::new(),
            pointers: DashMap::new(),
            behavior,
            heartbeat_config,
            health_config,
        }
    }

    fn node_lock(&self, node_id: &NodeId) -> Arc<Mutex<()>> {
        self.node_locks
            .entry(node_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn get_live(&self, node_id: &NodeId) -> Result<Node> {
        self.nodes
            .get(node_id)
            .map(|n| n.clone())
            .ok_or_else(|| RegistryError::NodeGone(node_id.clone()))
    }
}

#[async_trait]
impl ClusterRegistry for InMemoryClusterRegistry {
    async fn register_node(&self, node: Node) -> Result<NodeId> {
        let id = node.id.clone();
        info!(node_id = %id, environment = %node.environment, "node registered");
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    async fn deregister_node(&self, node_id: &NodeId) -> Result<bool> {
        self.node_locks.remove(node_id);
        Ok(self.nodes.remove(node_id).is_some())
    }

    async fn get_node(&self, node_id: &NodeId) -> Result<Option<Node>> {
        Ok(self.nodes.get(node_id).map(|n| n.clone()))
    }

    async fn list_nodes(&self, environment: Environment) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| n.environment == environment)
            .map(|n| n.clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn heartbeat(&self, node_id: &NodeId, counters: HealthCounters) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NodeNotFound(node_id.clone()))?;
        node.last_heartbeat = Utc::now();
        node.counters = counters;
        Ok(())
    }

    #[instrument(skip(self, artifact, cancel), fields(node_id = %node_id, artifact = %artifact))]
    async fn apply_artifact(
        &self,
        node_id: &NodeId,
        artifact: &ArtifactDescriptor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lock = self.node_lock(node_id);
        let _held = tokio::select! {
            held = lock.lock() => held,
            _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
        };

        let node = self.get_live(node_id)?;
        let target = artifact.artifact_ref();

        // Re-applying the installed artifact is a no-op success.
        if node.current_artifact.as_ref() == Some(&target) {
            return Ok(());
        }

        let outcome = tokio::select! {
            outcome = self.behavior.apply(&node, artifact) => outcome,
            _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
        };
        outcome.map_err(|reason| {
            warn!(node_id = %node_id, reason = %reason, "node apply failed");
            RegistryError::ApplyFailed {
                node_id: node_id.clone(),
                reason,
            }
        })?;

        // The node may have been deregistered while the apply ran.
        let mut entry = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NodeGone(node_id.clone()))?;
        entry.previous_artifact = entry.current_artifact.take();
        entry.current_artifact = Some(target);
        Ok(())
    }

    #[instrument(skip(self, cancel), fields(node_id = %node_id))]
    async fn rollback_artifact(&self, node_id: &NodeId, cancel: &CancellationToken) -> Result<()> {
        let lock = self.node_lock(node_id);
        let _held = tokio::select! {
            held = lock.lock() => held,
            _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
        };

        let node = self.get_live(node_id)?;
        if node.previous_artifact.is_none() {
            return Err(RegistryError::NoPreviousArtifact(node_id.clone()));
        }

        let outcome = tokio::select! {
            outcome = self.behavior.rollback(&node) => outcome,
            _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
        };
        outcome.map_err(|reason| {
            warn!(node_id = %node_id, reason = %reason, "node rollback failed");
            RegistryError::RollbackFailed {
                node_id: node_id.clone(),
                reason,
            }
        })?;

        let mut entry = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NodeGone(node_id.clone()))?;
        let previous = entry.previous_artifact.take();
        entry.previous_artifact = entry.current_artifact.take();
        entry.current_artifact = previous;
        Ok(())
    }

    async fn mark_inconsistent(&self, node_id: &NodeId) -> Result<()> {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.inconsistent = true;
            warn!(node_id = %node_id, "node marked inconsistent");
        }
        Ok(())
    }

    async fn clear_inconsistent(&self, node_id: &NodeId) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NodeNotFound(node_id.clone()))?;
        node.inconsistent = false;
        Ok(())
    }

    async fn traffic_pointer(&self, environment: Environment) -> Result<TrafficPool> {
        Ok(self
            .pointers
            .get(&environment)
            .map(|p| *p)
            .unwrap_or(TrafficPool::Blue))
    }

    async fn switch_traffic(
        &self,
        environment: Environment,
        to: TrafficPool,
    ) -> Result<TrafficPool> {
        let mut entry = self.pointers.entry(environment).or_insert(TrafficPool::Blue);
        let prior = *entry;
        *entry = to;
        info!(environment = %environment, from = ?prior, to = ?to, "traffic pointer switched");
        Ok(prior)
    }

    async fn cluster_status(&self, environment: Environment) -> Result<ClusterStatus> {
        let nodes = self.list_nodes(environment).await?;
        Ok(ClusterStatus::aggregate(
            environment,
            &nodes,
            &self.heartbeat_config,
            &self.health_config,
            Utc::now(),
        ))
    }
}

#[async_trait]
impl CounterSource for InMemoryClusterRegistry {
    async fn read_counters(
        &self,
        node_id: &NodeId,
    ) -> std::result::Result<Option<HealthCounters>, MetricsError> {
        Ok(self.nodes.get(node_id).map(|n| n.counters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_types::Environment;
    use semver::Version;
    use std::collections::BTreeMap;

    fn registry() -> InMemoryClusterRegistry {
        InMemoryClusterRegistry::with_behavior(
            HeartbeatConfig::default(),
            NodeHealthConfig::default(),
            Arc::new(SimulatedApply::new(Duration::from_millis(1))),
        )
    }

    fn artifact(version: Version) -> ArtifactDescriptor {
        ArtifactDescriptor::new(
            "payments",
            version,
            b"content".to_vec(),
            b"sig".to_vec(),
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_records_previous_artifact() {
        let registry = registry();
        let node = Node::new("w1", Environment::Development);
        let id = registry.register_node(node).await.unwrap();
        let cancel = CancellationToken::new();

        let v1 = artifact(Version::new(1, 0, 0));
        let v2 = artifact(Version::new(2, 0, 0));
        registry.apply_artifact(&id, &v1, &cancel).await.unwrap();
        registry.apply_artifact(&id, &v2, &cancel).await.unwrap();

        let node = registry.get_node(&id).await.unwrap().unwrap();
        assert_eq!(node.current_artifact, Some(v2.artifact_ref()));
        assert_eq!(node.previous_artifact, Some(v1.artifact_ref()));
    }

    #[tokio::test]
    async fn test_reapply_is_noop() {
        let registry = registry();
        let id = registry
            .register_node(Node::new("w1", Environment::Development))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let v1 = artifact(Version::new(1, 0, 0));

        registry.apply_artifact(&id, &v1, &cancel).await.unwrap();
        registry.apply_artifact(&id, &v1, &cancel).await.unwrap();

        let node = registry.get_node(&id).await.unwrap().unwrap();
        assert_eq!(node.current_artifact, Some(v1.artifact_ref()));
        // The no-op must not clobber previous_artifact.
        assert_eq!(node.previous_artifact, None);
    }

    #[tokio::test]
    async fn test_rollback_restores_previous() {
        let registry = registry();
        let id = registry
            .register_node(Node::new("w1", Environment::Development))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let v1 = artifact(Version::new(1, 0, 0));
        let v2 = artifact(Version::new(2, 0, 0));

        registry.apply_artifact(&id, &v1, &cancel).await.unwrap();
        registry.apply_artifact(&id, &v2, &cancel).await.unwrap();
        registry.rollback_artifact(&id, &cancel).await.unwrap();

        let node = registry.get_node(&id).await.unwrap().unwrap();
        assert_eq!(node.current_artifact, Some(v1.artifact_ref()));
    }

    #[tokio::test]
    async fn test_rollback_without_previous_fails() {
        let registry = registry();
        let id = registry
            .register_node(Node::new("w1", Environment::Development))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let result = registry.rollback_artifact(&id, &cancel).await;
        assert!(matches!(result, Err(RegistryError::NoPreviousArtifact(_))));
    }

    #[tokio::test]
    async fn test_deregistered_node_fails_apply() {
        let registry = registry();
        let id = registry
            .register_node(Node::new("w1", Environment::Development))
            .await
            .unwrap();
        registry.deregister_node(&id).await.unwrap();
        let result = registry
            .apply_artifact(&id, &artifact(Version::new(1, 0, 0)), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RegistryError::NodeGone(_))));
    }

    #[tokio::test]
    async fn test_cancelled_apply_leaves_node_untouched() {
        let registry = registry();
        let id = registry
            .register_node(Node::new("w1", Environment::Development))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = registry
            .apply_artifact(&id, &artifact(Version::new(1, 0, 0)), &cancel)
            .await;
        assert!(matches!(result, Err(RegistryError::Cancelled)));
        let node = registry.get_node(&id).await.unwrap().unwrap();
        assert_eq!(node.current_artifact, None);
    }

    #[tokio::test]
    async fn test_switch_traffic_returns_prior() {
        let registry = registry();
        let prior = registry
            .switch_traffic(Environment::Staging, TrafficPool::Green)
            .await
            .unwrap();
        assert_eq!(prior, TrafficPool::Blue);
        let pointer = registry.traffic_pointer(Environment::Staging).await.unwrap();
        assert_eq!(pointer, TrafficPool::Green);
    }
}
