//! Configuration knobs for the orchestration engine
//!
//! Every tunable recognized by the core, with the documented defaults.
//! Loading these from files or the environment is a collaborator concern;
//! these structs are the contract. Durations are serialized as seconds with
//! `Duration` accessors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration bundle handed to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvoyConfig {
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub node_health: NodeHealthConfig,

    #[serde(default)]
    pub rolling: RollingConfig,

    #[serde(default)]
    pub blue_green: BlueGreenConfig,

    #[serde(default)]
    pub canary: CanaryConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub stage_timeouts: StageTimeouts,
}

/// Node heartbeat window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// A node is stale once its last heartbeat is older than this.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub timeout_secs: u64,
}

impl HeartbeatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

/// Per-counter node health thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealthConfig {
    #[serde(default = "default_cpu_max")]
    pub cpu_max: f64,

    #[serde(default = "default_memory_max")]
    pub memory_max: f64,

    #[serde(default = "default_error_rate_max")]
    pub error_rate_max: f64,
}

impl Default for NodeHealthConfig {
    fn default() -> Self {
        Self {
            cpu_max: default_cpu_max(),
            memory_max: default_memory_max(),
            error_rate_max: default_error_rate_max(),
        }
    }
}

/// Rolling strategy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingConfig {
    /// Nodes updated per batch.
    #[serde(default = "default_rolling_batch_size")]
    pub batch_size: usize,

    /// How long a batch may take to come back Healthy before the rollout
    /// counts it as failed.
    #[serde(default = "default_batch_health_timeout_secs")]
    pub batch_health_timeout_secs: u64,
}

impl RollingConfig {
    pub fn batch_health_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_health_timeout_secs)
    }
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_rolling_batch_size(),
            batch_health_timeout_secs: default_batch_health_timeout_secs(),
        }
    }
}

/// Blue-Green strategy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueGreenConfig {
    /// Length of the smoke phase before the traffic switch.
    #[serde(default = "default_smoke_duration_secs")]
    pub smoke_duration_secs: u64,

    /// Cadence of smoke checks inside the smoke phase.
    #[serde(default = "default_smoke_interval_secs")]
    pub smoke_interval_secs: u64,
}

impl BlueGreenConfig {
    pub fn smoke_duration(&self) -> Duration {
        Duration::from_secs(self.smoke_duration_secs)
    }

    pub fn smoke_interval(&self) -> Duration {
        Duration::from_secs(self.smoke_interval_secs)
    }
}

impl Default for BlueGreenConfig {
    fn default() -> Self {
        Self {
            smoke_duration_secs: default_smoke_duration_secs(),
            smoke_interval_secs: default_smoke_interval_secs(),
        }
    }
}

/// Canary strategy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryConfig {
    /// Cumulative rollout fractions; the final wave always covers the
    /// remainder of the cluster.
    #[serde(default = "default_canary_waves")]
    pub waves: Vec<f64>,

    /// Observation interval after each wave.
    #[serde(default = "default_soak_duration_secs")]
    pub soak_duration_secs: u64,

    /// Degradation thresholds relative to the pre-rollout baseline.
    #[serde(default)]
    pub degradation: DegradationPolicy,
}

impl CanaryConfig {
    pub fn soak_duration(&self) -> Duration {
        Duration::from_secs(self.soak_duration_secs)
    }
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            waves: default_canary_waves(),
            soak_duration_secs: default_soak_duration_secs(),
            degradation: DegradationPolicy::default(),
        }
    }
}

/// Canary degradation rule: current vs baseline ratios. This is data, not
/// code; operators tune it per service and per environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DegradationPolicy {
    #[serde(default = "default_error_rate_ratio")]
    pub error_rate_ratio: f64,

    #[serde(default = "default_latency_ratio")]
    pub latency_ratio: f64,

    #[serde(default = "default_cpu_ratio")]
    pub cpu_ratio: f64,

    #[serde(default = "default_memory_ratio")]
    pub memory_ratio: f64,
}

impl Default for DegradationPolicy {
    fn default() -> Self {
        Self {
            error_rate_ratio: default_error_rate_ratio(),
            latency_ratio: default_latency_ratio(),
            cpu_ratio: default_cpu_ratio(),
            memory_ratio: default_memory_ratio(),
        }
    }
}

/// Tuning shared by all strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Per-rollout cap on concurrent node operations.
    #[serde(default = "default_per_node_concurrency")]
    pub per_node_concurrency: usize,

    /// Per-node apply/rollback timeout.
    #[serde(default = "default_node_apply_timeout_secs")]
    pub node_apply_timeout_secs: u64,

    /// Cadence of health polls while waiting on a batch or smoke phase.
    #[serde(default = "default_health_poll_interval_millis")]
    pub health_poll_interval_millis: u64,
}

impl StrategyConfig {
    pub fn node_apply_timeout(&self) -> Duration {
        Duration::from_secs(self.node_apply_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_millis)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            per_node_concurrency: default_per_node_concurrency(),
            node_apply_timeout_secs: default_node_apply_timeout_secs(),
            health_poll_interval_millis: default_health_poll_interval_millis(),
        }
    }
}

/// Approval gate tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// How long a Pending approval waits before expiring.
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,

    /// Sweeper cadence for expiring overdue approvals.
    #[serde(default = "default_approval_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long resolved approvals are retained for audit reads.
    #[serde(default = "default_approval_retention_secs")]
    pub retention_secs: u64,
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout_secs(),
            sweep_interval_secs: default_approval_sweep_interval_secs(),
            retention_secs: default_approval_retention_secs(),
        }
    }
}

/// Tracker store TTLs and sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    #[serde(default = "default_in_progress_ttl_secs")]
    pub in_progress_ttl_secs: u64,

    #[serde(default = "default_tracker_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl TrackerConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn in_progress_ttl(&self) -> Duration {
        Duration::from_secs(self.in_progress_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            result_ttl_secs: default_result_ttl_secs(),
            in_progress_ttl_secs: default_in_progress_ttl_secs(),
            sweep_interval_secs: default_tracker_sweep_interval_secs(),
        }
    }
}

/// Metrics snapshot caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Per-node snapshot cache TTL; bounds read load on the fleet.
    #[serde(default = "default_metrics_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl MetricsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_metrics_cache_ttl_secs(),
        }
    }
}

/// Signature verification mode. Production is always strict regardless of
/// this setting; the pipeline enforces that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            strict: default_true(),
        }
    }
}

/// Orchestrator queue and worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded submission queue depth; overflow is a Backpressure error.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Number of pipeline worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded wait for the per-cluster and per-execution locks.
    #[serde(default = "default_lock_wait_timeout_secs")]
    pub lock_wait_timeout_secs: u64,

    /// TTL on held locks, bounding the blast radius of a crashed holder.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl EngineConfig {
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_wait_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            workers: default_workers(),
            lock_wait_timeout_secs: default_lock_wait_timeout_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

/// Per-stage pipeline timeouts. A stage that overruns its timeout is a
/// stage failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(default = "default_build_timeout_secs")]
    pub build_secs: u64,

    #[serde(default = "default_test_timeout_secs")]
    pub test_secs: u64,

    #[serde(default = "default_scan_timeout_secs")]
    pub security_scan_secs: u64,

    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_secs: u64,

    #[serde(default = "default_validate_timeout_secs")]
    pub validate_secs: u64,
}

impl StageTimeouts {
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn test(&self) -> Duration {
        Duration::from_secs(self.test_secs)
    }

    pub fn security_scan(&self) -> Duration {
        Duration::from_secs(self.security_scan_secs)
    }

    pub fn deploy(&self) -> Duration {
        Duration::from_secs(self.deploy_secs)
    }

    pub fn validate(&self) -> Duration {
        Duration::from_secs(self.validate_secs)
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            build_secs: default_build_timeout_secs(),
            test_secs: default_test_timeout_secs(),
            security_scan_secs: default_scan_timeout_secs(),
            deploy_secs: default_deploy_timeout_secs(),
            validate_secs: default_validate_timeout_secs(),
        }
    }
}

fn default_heartbeat_timeout_secs() -> u64 {
    120
}

fn default_cpu_max() -> f64 {
    90.0
}

fn default_memory_max() -> f64 {
    90.0
}

fn default_error_rate_max() -> f64 {
    0.05
}

fn default_rolling_batch_size() -> usize {
    2
}

fn default_batch_health_timeout_secs() -> u64 {
    120
}

fn default_smoke_duration_secs() -> u64 {
    300
}

fn default_smoke_interval_secs() -> u64 {
    15
}

fn default_canary_waves() -> Vec<f64> {
    vec![0.1, 0.3, 0.5, 1.0]
}

fn default_soak_duration_secs() -> u64 {
    300
}

fn default_error_rate_ratio() -> f64 {
    1.5
}

fn default_latency_ratio() -> f64 {
    2.0
}

fn default_cpu_ratio() -> f64 {
    1.3
}

fn default_memory_ratio() -> f64 {
    1.3
}

fn default_per_node_concurrency() -> usize {
    10
}

fn default_node_apply_timeout_secs() -> u64 {
    30
}

fn default_health_poll_interval_millis() -> u64 {
    250
}

fn default_approval_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_approval_sweep_interval_secs() -> u64 {
    60
}

fn default_approval_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_result_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_in_progress_ttl_secs() -> u64 {
    2 * 60 * 60
}

fn default_tracker_sweep_interval_secs() -> u64 {
    300
}

fn default_metrics_cache_ttl_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_queue_depth() -> usize {
    256
}

fn default_workers() -> usize {
    4
}

fn default_lock_wait_timeout_secs() -> u64 {
    10
}

fn default_lock_ttl_secs() -> u64 {
    120
}

fn default_build_timeout_secs() -> u64 {
    120
}

fn default_test_timeout_secs() -> u64 {
    600
}

fn default_scan_timeout_secs() -> u64 {
    60
}

fn default_deploy_timeout_secs() -> u64 {
    3600
}

fn default_validate_timeout_secs() -> u64 {
    60
}
