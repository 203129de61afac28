//! Snapshot types and mean helpers

use chrono::{DateTime, Utc};
use convoy_types::{HealthCounters, NodeId};
use serde::{Deserialize, Serialize};

/// One node's counters at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSample {
    pub node_id: NodeId,
    pub counters: HealthCounters,
    pub sampled_at: DateTime<Utc>,
}

/// A set of node samples taken together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub samples: Vec<NodeSample>,
}

impl MetricsSnapshot {
    pub fn new(samples: Vec<NodeSample>) -> Self {
        Self {
            taken_at: Utc::now(),
            samples,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    fn mean(&self, f: impl Fn(&HealthCounters) -> f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| f(&s.counters)).sum();
        Some(sum / self.samples.len() as f64)
    }

    pub fn mean_cpu(&self) -> Option<f64> {
        self.mean(|c| c.cpu_percent)
    }

    pub fn mean_memory(&self) -> Option<f64> {
        self.mean(|c| c.memory_percent)
    }

    pub fn mean_latency(&self) -> Option<f64> {
        self.mean(|c| c.latency_ms)
    }

    pub fn mean_error_rate(&self) -> Option<f64> {
        self.mean(|c| c.error_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(latency: f64) -> NodeSample {
        NodeSample {
            node_id: NodeId::generate(),
            counters: HealthCounters {
                latency_ms: latency,
                ..Default::default()
            },
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn test_means() {
        let snapshot = MetricsSnapshot::new(vec![sample(10.0), sample(30.0)]);
        assert_eq!(snapshot.mean_latency(), Some(20.0));
        assert_eq!(snapshot.mean_cpu(), Some(0.0));
    }

    #[test]
    fn test_empty_snapshot_has_no_means() {
        let snapshot = MetricsSnapshot::new(Vec::new());
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.mean_latency(), None);
    }
}
