//! Rollout context - execution environment for strategies
//!
//! The context is the bridge between strategy choreography and node
//! operations. It snapshots the cluster's node set at creation
//! (copy-on-read: registry changes during the rollout are not picked up)
//! and carries the registry, metrics and smoke-check handles plus the
//! relevant configuration.

use crate::error::Result;
use crate::executor::{NodeAction, NodeOutcome};
use async_trait::async_trait;
use chrono::Utc;
use convoy_metrics::{MetricsProvider, MetricsSnapshot};
use convoy_registry::ClusterRegistry;
use convoy_types::{
    ArtifactDescriptor, ArtifactRef, ConvoyConfig, Environment, Node, NodeHealth, NodeId,
    TrafficPool,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Synthetic-request check run against each Green node during the
/// Blue-Green smoke phase.
#[async_trait]
pub trait SmokeCheck: Send + Sync {
    /// `Err` carries the failure reason.
    async fn check(&self, node: &Node) -> std::result::Result<(), String>;
}

/// Smoke check that always passes; the default outside Staging tests.
pub struct AlwaysPassSmoke;

#[async_trait]
impl SmokeCheck for AlwaysPassSmoke {
    async fn check(&self, _node: &Node) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Context handed to rollout strategies.
pub struct RolloutContext {
    registry: Arc<dyn ClusterRegistry>,
    metrics: Arc<dyn MetricsProvider>,
    smoke: Arc<dyn SmokeCheck>,
    environment: Environment,
    artifact: ArtifactRef,
    /// Present for deploys; rollback-only contexts (administrative
    /// rollback of a finished execution) carry just the identity.
    descriptor: Option<ArtifactDescriptor>,
    config: ConvoyConfig,
    nodes: Vec<Node>,
}

impl RolloutContext {
    /// Snapshot the cluster and build a context for a deploy. Node order
    /// is stable (ascending node id) so tranche selection is
    /// deterministic.
    pub async fn create(
        registry: Arc<dyn ClusterRegistry>,
        metrics: Arc<dyn MetricsProvider>,
        smoke: Arc<dyn SmokeCheck>,
        environment: Environment,
        artifact: ArtifactDescriptor,
        config: ConvoyConfig,
    ) -> Result<Self> {
        let nodes = registry.list_nodes(environment).await?;
        Ok(Self {
            registry,
            metrics,
            smoke,
            environment,
            artifact: artifact.artifact_ref(),
            descriptor: Some(artifact),
            config,
            nodes,
        })
    }

    /// Context for rolling an already-promoted artifact back. The content
    /// is gone by then; only the identity is needed to find the nodes
    /// running it.
    pub async fn create_for_rollback(
        registry: Arc<dyn ClusterRegistry>,
        metrics: Arc<dyn MetricsProvider>,
        smoke: Arc<dyn SmokeCheck>,
        environment: Environment,
        artifact: ArtifactRef,
        config: ConvoyConfig,
    ) -> Result<Self> {
        let nodes = registry.list_nodes(environment).await?;
        Ok(Self {
            registry,
            metrics,
            smoke,
            environment,
            artifact,
            descriptor: None,
            config,
            nodes,
        })
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Identity of the artifact this rollout concerns.
    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    pub fn config(&self) -> &ConvoyConfig {
        &self.config
    }

    /// The node set read at context creation.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Apply the artifact to one node, bounded by the per-node timeout.
    pub async fn apply_node(&self, node_id: &NodeId, cancel: &CancellationToken) -> NodeOutcome {
        let Some(descriptor) = &self.descriptor else {
            return NodeOutcome {
                node_id: node_id.clone(),
                action: NodeAction::Apply,
                success: false,
                error: Some("artifact content unavailable in rollback context".to_string()),
            };
        };
        let outcome = tokio::time::timeout(
            self.config.strategy.node_apply_timeout(),
            self.registry.apply_artifact(node_id, descriptor, cancel),
        )
        .await;

        match outcome {
            Ok(Ok(())) => NodeOutcome {
                node_id: node_id.clone(),
                action: NodeAction::Apply,
                success: true,
                error: None,
            },
            Ok(Err(e)) => NodeOutcome {
                node_id: node_id.clone(),
                action: NodeAction::Apply,
                success: false,
                error: Some(e.to_string()),
            },
            Err(_) => NodeOutcome {
                node_id: node_id.clone(),
                action: NodeAction::Apply,
                success: false,
                error: Some("node apply timed out".to_string()),
            },
        }
    }

    /// Roll one node back to its previous artifact.
    pub async fn rollback_node(
        &self,
        node_id: &NodeId,
        cancel: &CancellationToken,
    ) -> NodeOutcome {
        let outcome = tokio::time::timeout(
            self.config.strategy.node_apply_timeout(),
            self.registry.rollback_artifact(node_id, cancel),
        )
        .await;

        match outcome {
            Ok(Ok(())) => NodeOutcome {
                node_id: node_id.clone(),
                action: NodeAction::Rollback,
                success: true,
                error: None,
            },
            Ok(Err(e)) => NodeOutcome {
                node_id: node_id.clone(),
                action: NodeAction::Rollback,
                success: false,
                error: Some(e.to_string()),
            },
            Err(_) => NodeOutcome {
                node_id: node_id.clone(),
                action: NodeAction::Rollback,
                success: false,
                error: Some("node rollback timed out".to_string()),
            },
        }
    }

    /// Apply to a set of nodes with bounded concurrency: effective
    /// parallelism is min(configured limit, set size).
    pub async fn apply_many(
        &self,
        node_ids: &[NodeId],
        cancel: &CancellationToken,
    ) -> Vec<NodeOutcome> {
        if node_ids.is_empty() {
            return Vec::new();
        }
        let limit = self
            .config
            .strategy
            .per_node_concurrency
            .min(node_ids.len())
            .max(1);

        stream::iter(node_ids.iter().cloned())
            .map(|node_id| {
                let cancel = cancel.clone();
                async move { self.apply_node(&node_id, &cancel).await }
            })
            .buffer_unordered(limit)
            .collect()
            .await
    }

    /// Roll back updated nodes in reverse order of update. Sequential so
    /// the reverse ordering guarantee holds. Rollback runs under a fresh
    /// cancellation token: it must complete even when the rollout itself
    /// was cancelled. Failed nodes are flagged inconsistent in the
    /// registry and returned.
    pub async fn rollback_reverse(
        &self,
        updated_in_order: &[NodeId],
    ) -> (Vec<NodeOutcome>, Vec<NodeId>) {
        let rollback_token = CancellationToken::new();
        let mut outcomes = Vec::with_capacity(updated_in_order.len());
        let mut inconsistent = Vec::new();

        for node_id in updated_in_order.iter().rev() {
            let outcome = self.rollback_node(node_id, &rollback_token).await;
            if !outcome.success {
                warn!(node_id = %node_id, error = ?outcome.error, "rollback failed, marking inconsistent");
                let _ = self.registry.mark_inconsistent(node_id).await;
                inconsistent.push(node_id.clone());
            }
            outcomes.push(outcome);
        }

        if inconsistent.is_empty() && !updated_in_order.is_empty() {
            info!(
                count = updated_in_order.len(),
                environment = %self.environment,
                "rollout reverted"
            );
        }
        (outcomes, inconsistent)
    }

    /// Current health of one node; `None` when it left the registry.
    pub async fn node_health(&self, node_id: &NodeId) -> Result<Option<NodeHealth>> {
        let Some(node) = self.registry.get_node(node_id).await? else {
            return Ok(None);
        };
        Ok(Some(node.health(
            &self.config.heartbeat,
            &self.config.node_health,
            Utc::now(),
        )))
    }

    /// Whether every listed node currently reports Healthy.
    pub async fn all_healthy(&self, node_ids: &[NodeId]) -> Result<bool> {
        for node_id in node_ids {
            match self.node_health(node_id).await? {
                Some(NodeHealth::Healthy) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Poll until every node reports Healthy, the timeout lapses, or the
    /// rollout is cancelled. Returns whether the set came back Healthy.
    pub async fn wait_until_healthy(
        &self,
        node_ids: &[NodeId],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.all_healthy(node_ids).await? {
                return Ok(true);
            }
            if cancel.is_cancelled() || Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.strategy.health_poll_interval()) => {}
                _ = cancel.cancelled() => return Ok(false),
            }
        }
    }

    /// Run the smoke check against every listed node; first failure wins.
    pub async fn smoke_all(&self, nodes: &[Node]) -> std::result::Result<(), String> {
        for node in nodes {
            self.smoke
                .check(node)
                .await
                .map_err(|reason| format!("smoke check failed on {}: {reason}", node.id))?;
        }
        Ok(())
    }

    /// Uncached snapshot for baselines and soak evaluations.
    pub async fn fresh_snapshot(&self, node_ids: &[NodeId]) -> Result<MetricsSnapshot> {
        Ok(self.metrics.fresh_snapshot(node_ids).await?)
    }

    /// Cached snapshot for cheap health sampling.
    pub async fn snapshot(&self, node_ids: &[NodeId]) -> Result<MetricsSnapshot> {
        Ok(self.metrics.snapshot(node_ids).await?)
    }

    pub async fn traffic_pointer(&self) -> Result<TrafficPool> {
        Ok(self.registry.traffic_pointer(self.environment).await?)
    }

    /// Swap the serving pool; returns the prior pointer.
    pub async fn switch_traffic(&self, to: TrafficPool) -> Result<TrafficPool> {
        Ok(self.registry.switch_traffic(self.environment, to).await?)
    }

    /// Fresh registry read of the nodes currently running this context's
    /// artifact, ascending node id. Basis for administrative rollback.
    pub async fn nodes_running_artifact(&self) -> Result<Vec<NodeId>> {
        let nodes = self.registry.list_nodes(self.environment).await?;
        Ok(nodes
            .into_iter()
            .filter(|n| n.current_artifact.as_ref() == Some(&self.artifact))
            .map(|n| n.id)
            .collect())
    }
}
