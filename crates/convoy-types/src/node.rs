//! Worker node and cluster health model
//!
//! Nodes are owned by their cluster (one cluster per environment). Health
//! evaluation is pure: counters + thresholds + a supplied `now` in, a
//! three-valued verdict out. Aggregation to cluster level applies the
//! per-environment unhealthy tolerance.

use crate::artifact::ArtifactRef;
use crate::config::{HeartbeatConfig, NodeHealthConfig};
use crate::environment::Environment;
use crate::ids::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed health counters reported by a node's heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthCounters {
    /// CPU utilization, 0..100.
    pub cpu_percent: f64,
    /// Memory utilization, 0..100.
    pub memory_percent: f64,
    /// Request latency in milliseconds.
    pub latency_ms: f64,
    /// Error rate, 0..1.
    pub error_rate: f64,
}

impl Default for HealthCounters {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            latency_ms: 0.0,
            error_rate: 0.0,
        }
    }
}

/// Three-valued node health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Which logical pool a node serves in (used by the Blue-Green strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficPool {
    Blue,
    Green,
}

impl TrafficPool {
    pub fn other(&self) -> TrafficPool {
        match self {
            TrafficPool::Blue => TrafficPool::Green,
            TrafficPool::Green => TrafficPool::Blue,
        }
    }
}

/// A worker node in one environment's cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    pub environment: Environment,
    /// Pool membership; only meaningful for Blue-Green environments but
    /// tracked everywhere so registration stays uniform.
    pub pool: TrafficPool,
    /// Artifact currently installed, if any.
    pub current_artifact: Option<ArtifactRef>,
    /// Artifact installed before the current one; enables rollback.
    pub previous_artifact: Option<ArtifactRef>,
    pub last_heartbeat: DateTime<Utc>,
    pub counters: HealthCounters,
    /// Set when a rollback failed on this node; cleared only by operator
    /// action through the registry.
    pub inconsistent: bool,
}

impl Node {
    pub fn new(hostname: impl Into<String>, environment: Environment) -> Self {
        Self {
            id: NodeId::generate(),
            hostname: hostname.into(),
            environment,
            pool: TrafficPool::Blue,
            current_artifact: None,
            previous_artifact: None,
            last_heartbeat: Utc::now(),
            counters: HealthCounters::default(),
            inconsistent: false,
        }
    }

    pub fn with_pool(mut self, pool: TrafficPool) -> Self {
        self.pool = pool;
        self
    }

    /// Pure health evaluation.
    ///
    /// A stale heartbeat is Unhealthy outright; fresh nodes with any counter
    /// at or above its threshold are Degraded; everything else is Healthy.
    pub fn health(
        &self,
        heartbeat: &HeartbeatConfig,
        thresholds: &NodeHealthConfig,
        now: DateTime<Utc>,
    ) -> NodeHealth {
        let age = now.signed_duration_since(self.last_heartbeat);
        let timeout = chrono::Duration::milliseconds(heartbeat.timeout().as_millis() as i64);
        if age >= timeout {
            return NodeHealth::Unhealthy;
        }
        let c = &self.counters;
        if c.cpu_percent >= thresholds.cpu_max
            || c.memory_percent >= thresholds.memory_max
            || c.error_rate >= thresholds.error_rate_max
        {
            return NodeHealth::Degraded;
        }
        NodeHealth::Healthy
    }
}

/// Three-valued cluster health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Aggregate view of one environment's cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub environment: Environment,
    pub health: ClusterHealth,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub degraded_nodes: usize,
    pub unhealthy_nodes: usize,
    /// Rolling averages across all nodes.
    pub average_counters: HealthCounters,
}

impl ClusterStatus {
    /// Aggregate node health with the environment's unhealthy tolerance.
    ///
    /// Healthy iff every node is Healthy; Degraded while the count of
    /// not-Healthy nodes stays within tolerance; Unhealthy past it. An empty
    /// cluster is Healthy (nothing to degrade).
    pub fn aggregate(
        environment: Environment,
        nodes: &[Node],
        heartbeat: &HeartbeatConfig,
        thresholds: &NodeHealthConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let mut healthy = 0usize;
        let mut degraded = 0usize;
        let mut unhealthy = 0usize;
        let mut sums = HealthCounters::default();

        for node in nodes {
            match node.health(heartbeat, thresholds, now) {
                NodeHealth::Healthy => healthy += 1,
                NodeHealth::Degraded => degraded += 1,
                NodeHealth::Unhealthy => unhealthy += 1,
            }
            sums.cpu_percent += node.counters.cpu_percent;
            sums.memory_percent += node.counters.memory_percent;
            sums.latency_ms += node.counters.latency_ms;
            sums.error_rate += node.counters.error_rate;
        }

        let total = nodes.len();
        let average_counters = if total == 0 {
            HealthCounters::default()
        } else {
            let n = total as f64;
            HealthCounters {
                cpu_percent: sums.cpu_percent / n,
                memory_percent: sums.memory_percent / n,
                latency_ms: sums.latency_ms / n,
                error_rate: sums.error_rate / n,
            }
        };

        let not_healthy = degraded + unhealthy;
        let health = if not_healthy == 0 {
            ClusterHealth::Healthy
        } else if not_healthy <= environment.unhealthy_tolerance() {
            ClusterHealth::Degraded
        } else {
            ClusterHealth::Unhealthy
        };

        Self {
            environment,
            health,
            total_nodes: total,
            healthy_nodes: healthy,
            degraded_nodes: degraded,
            unhealthy_nodes: unhealthy,
            average_counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_node(env: Environment) -> Node {
        Node::new("worker-1.internal", env)
    }

    #[test]
    fn test_fresh_quiet_node_is_healthy() {
        let node = fresh_node(Environment::Development);
        let health = node.health(
            &HeartbeatConfig::default(),
            &NodeHealthConfig::default(),
            Utc::now(),
        );
        assert_eq!(health, NodeHealth::Healthy);
    }

    #[test]
    fn test_stale_heartbeat_is_unhealthy() {
        let mut node = fresh_node(Environment::Development);
        node.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
        let health = node.health(
            &HeartbeatConfig::default(),
            &NodeHealthConfig::default(),
            Utc::now(),
        );
        assert_eq!(health, NodeHealth::Unhealthy);
    }

    #[test]
    fn test_hot_cpu_is_degraded() {
        let mut node = fresh_node(Environment::Development);
        node.counters.cpu_percent = 95.0;
        let health = node.health(
            &HeartbeatConfig::default(),
            &NodeHealthConfig::default(),
            Utc::now(),
        );
        assert_eq!(health, NodeHealth::Degraded);
    }

    #[test]
    fn test_cluster_aggregation_tolerance() {
        let now = Utc::now();
        let heartbeat = HeartbeatConfig::default();
        let thresholds = NodeHealthConfig::default();

        let mut nodes: Vec<Node> = (0..4)
            .map(|_| fresh_node(Environment::Production))
            .collect();
        let status =
            ClusterStatus::aggregate(Environment::Production, &nodes, &heartbeat, &thresholds, now);
        assert_eq!(status.health, ClusterHealth::Healthy);

        nodes[0].counters.error_rate = 0.5;
        let status =
            ClusterStatus::aggregate(Environment::Production, &nodes, &heartbeat, &thresholds, now);
        assert_eq!(status.health, ClusterHealth::Degraded);

        nodes[1].counters.error_rate = 0.5;
        let status =
            ClusterStatus::aggregate(Environment::Production, &nodes, &heartbeat, &thresholds, now);
        assert_eq!(status.health, ClusterHealth::Unhealthy);
    }

    #[test]
    fn test_empty_cluster_is_healthy() {
        let status = ClusterStatus::aggregate(
            Environment::Qa,
            &[],
            &HeartbeatConfig::default(),
            &NodeHealthConfig::default(),
            Utc::now(),
        );
        assert_eq!(status.health, ClusterHealth::Healthy);
        assert_eq!(status.total_nodes, 0);
    }
}
