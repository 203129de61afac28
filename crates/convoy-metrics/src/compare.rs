//! Degradation comparison
//!
//! Pure: two snapshots and a policy in, a verdict out. The Canary strategy
//! and post-deploy validation both call through here so the rule lives in
//! exactly one place.

use crate::snapshot::MetricsSnapshot;
use convoy_types::DegradationPolicy;
use tracing::debug;

// A zero baseline would flag any activity at all; floor each baseline mean
// so the ratio stays meaningful on quiet fleets.
const MIN_BASELINE_ERROR_RATE: f64 = 0.001;
const MIN_BASELINE_LATENCY_MS: f64 = 1.0;
const MIN_BASELINE_PERCENT: f64 = 1.0;

/// Whether `current` is degraded relative to `baseline` under `policy`.
///
/// Degraded iff any counter's current mean exceeds the baseline mean times
/// its policy ratio, each side over non-empty samples. An empty current
/// sample set is conservatively degraded (no evidence of health is not
/// health). An empty baseline cannot support a comparison and is treated
/// the same way.
pub fn is_degraded(
    current: &MetricsSnapshot,
    baseline: &MetricsSnapshot,
    policy: &DegradationPolicy,
) -> bool {
    let (Some(cur_error), Some(cur_latency), Some(cur_cpu), Some(cur_memory)) = (
        current.mean_error_rate(),
        current.mean_latency(),
        current.mean_cpu(),
        current.mean_memory(),
    ) else {
        return true;
    };
    let (Some(base_error), Some(base_latency), Some(base_cpu), Some(base_memory)) = (
        baseline.mean_error_rate(),
        baseline.mean_latency(),
        baseline.mean_cpu(),
        baseline.mean_memory(),
    ) else {
        return true;
    };

    let error_bound = base_error.max(MIN_BASELINE_ERROR_RATE) * policy.error_rate_ratio;
    let latency_bound = base_latency.max(MIN_BASELINE_LATENCY_MS) * policy.latency_ratio;
    let cpu_bound = base_cpu.max(MIN_BASELINE_PERCENT) * policy.cpu_ratio;
    let memory_bound = base_memory.max(MIN_BASELINE_PERCENT) * policy.memory_ratio;

    let degraded = cur_error > error_bound
        || cur_latency > latency_bound
        || cur_cpu > cpu_bound
        || cur_memory > memory_bound;

    if degraded {
        debug!(
            cur_error,
            error_bound,
            cur_latency,
            latency_bound,
            cur_cpu,
            cpu_bound,
            cur_memory,
            memory_bound,
            "degradation detected"
        );
    }

    degraded
}
