//! Metrics provider trait and the caching implementation

use crate::error::Result;
use crate::snapshot::{MetricsSnapshot, NodeSample};
use async_trait::async_trait;
use chrono::Utc;
use convoy_types::{HealthCounters, MetricsConfig, NodeId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::trace;

/// Where counters come from. The cluster registry implements this; tests
/// plug scripted sources in.
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Current counters for one node, `None` when the node is gone.
    async fn read_counters(&self, node_id: &NodeId) -> Result<Option<HealthCounters>>;
}

/// Snapshot reads over a set of nodes.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Cached read; each node's sample may be up to the cache TTL old.
    async fn snapshot(&self, nodes: &[NodeId]) -> Result<MetricsSnapshot>;

    /// Uncached read, bypassing and refreshing the cache. Used for
    /// baselines and post-soak evaluations where staleness would hide a
    /// regression.
    async fn fresh_snapshot(&self, nodes: &[NodeId]) -> Result<MetricsSnapshot>;
}

struct CacheEntry {
    sample: NodeSample,
    cached_at: Instant,
}

/// Caching provider over a counter source.
pub struct CachingMetricsProvider {
    source: Arc<dyn CounterSource>,
    config: MetricsConfig,
    cache: DashMap<NodeId, CacheEntry>,
}

impl CachingMetricsProvider {
    pub fn new(source: Arc<dyn CounterSource>, config: MetricsConfig) -> Self {
        Self {
            source,
            config,
            cache: DashMap::new(),
        }
    }

    async fn read_one(&self, node_id: &NodeId, bypass_cache: bool) -> Result<Option<NodeSample>> {
        if !bypass_cache {
            if let Some(entry) = self.cache.get(node_id) {
                if entry.cached_at.elapsed() < self.config.cache_ttl() {
                    trace!(node_id = %node_id, "metrics cache hit");
                    return Ok(Some(entry.sample.clone()));
                }
            }
        }

        let Some(counters) = self.source.read_counters(node_id).await? else {
            self.cache.remove(node_id);
            return Ok(None);
        };

        let sample = NodeSample {
            node_id: node_id.clone(),
            counters,
            sampled_at: Utc::now(),
        };
        self.cache.insert(
            node_id.clone(),
            CacheEntry {
                sample: sample.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(Some(sample))
    }

    async fn collect(&self, nodes: &[NodeId], bypass_cache: bool) -> Result<MetricsSnapshot> {
        let mut samples = Vec::with_capacity(nodes.len());
        for node_id in nodes {
            if let Some(sample) = self.read_one(node_id, bypass_cache).await? {
                samples.push(sample);
            }
        }
        Ok(MetricsSnapshot::new(samples))
    }
}

#[async_trait]
impl MetricsProvider for CachingMetricsProvider {
    async fn snapshot(&self, nodes: &[NodeId]) -> Result<MetricsSnapshot> {
        self.collect(nodes, false).await
    }

    async fn fresh_snapshot(&self, nodes: &[NodeId]) -> Result<MetricsSnapshot> {
        self.collect(nodes, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl CounterSource for CountingSource {
        async fn read_counters(&self, _node_id: &NodeId) -> Result<Option<HealthCounters>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(HealthCounters::default()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_bounds_source_reads() {
        let source = Arc::new(CountingSource {
            reads: AtomicUsize::new(0),
        });
        let provider = CachingMetricsProvider::new(source.clone(), MetricsConfig::default());
        let nodes = vec![NodeId::generate()];

        provider.snapshot(&nodes).await.unwrap();
        provider.snapshot(&nodes).await.unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);

        tokio::time::advance(std::time::Duration::from_secs(11)).await;
        provider.snapshot(&nodes).await.unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fresh_snapshot_bypasses_cache() {
        let source = Arc::new(CountingSource {
            reads: AtomicUsize::new(0),
        });
        let provider = CachingMetricsProvider::new(source.clone(), MetricsConfig::default());
        let nodes = vec![NodeId::generate()];

        provider.snapshot(&nodes).await.unwrap();
        provider.fresh_snapshot(&nodes).await.unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    struct GoneSource;

    #[async_trait]
    impl CounterSource for GoneSource {
        async fn read_counters(&self, _node_id: &NodeId) -> Result<Option<HealthCounters>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_missing_nodes_are_omitted() {
        let provider = CachingMetricsProvider::new(Arc::new(GoneSource), MetricsConfig::default());
        let snapshot = provider
            .snapshot(&[NodeId::generate(), NodeId::generate()])
            .await
            .unwrap();
        assert!(snapshot.is_empty());
    }
}
