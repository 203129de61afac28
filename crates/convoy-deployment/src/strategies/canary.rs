//! Canary rollout strategy
//!
//! Production clusters: cumulative waves over a deterministic node order,
//! each followed by a soak and a metrics comparison against the
//! pre-rollout baseline. Degradation reverts every updated node in reverse
//! order of update.

use super::{revert, succeeded_in_order};
use crate::context::RolloutContext;
use crate::error::Result;
use crate::executor::{RolloutResult, RolloutStrategy};
use async_trait::async_trait;
use convoy_metrics::is_degraded;
use convoy_types::NodeId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct CanaryStrategy;

/// Translate cumulative wave fractions into cumulative node counts.
///
/// Monotonic: a wave that would add zero nodes coalesces to at least one;
/// the final wave always covers the remainder of the cluster.
fn wave_targets(fractions: &[f64], node_count: usize) -> Vec<usize> {
    let mut targets = Vec::with_capacity(fractions.len());
    let mut prev = 0usize;
    for fraction in fractions {
        let mut target = ((fraction * node_count as f64).ceil() as usize).min(node_count);
        if target <= prev {
            target = (prev + 1).min(node_count);
        }
        if target > prev {
            targets.push(target);
            prev = target;
        }
    }
    if prev < node_count {
        targets.push(node_count);
    }
    targets
}

#[async_trait]
impl RolloutStrategy for CanaryStrategy {
    #[instrument(skip_all, fields(environment = %ctx.environment(), artifact = %ctx.artifact()))]
    async fn deploy(
        &self,
        ctx: &RolloutContext,
        cancel: &CancellationToken,
    ) -> Result<RolloutResult> {
        let started = Instant::now();
        // Node order is ascending node id (the context guarantees it), so
        // tranche selection is deterministic across retries.
        let ids = ctx.node_ids();
        if ids.is_empty() {
            return Ok(RolloutResult::no_op(started.elapsed()));
        }

        let targets = wave_targets(&ctx.config().canary.waves, ids.len());
        let soak = ctx.config().canary.soak_duration();
        let policy = ctx.config().canary.degradation;

        info!(
            nodes = ids.len(),
            waves = targets.len(),
            soak = ?soak,
            "starting canary rollout"
        );

        let baseline = ctx.fresh_snapshot(&ids).await?;

        let mut outcomes = Vec::with_capacity(ids.len());
        let mut updated: Vec<NodeId> = Vec::new();

        for (index, target) in targets.iter().enumerate() {
            let wave = index + 1;
            if cancel.is_cancelled() {
                return Ok(revert(ctx, &updated, outcomes, started, "rollout cancelled").await);
            }

            let tranche: Vec<NodeId> = ids[updated.len()..*target].to_vec();
            info!(wave, tranche = tranche.len(), "canary wave starting");

            let tranche_outcomes = ctx.apply_many(&tranche, cancel).await;
            let tranche_ok = tranche_outcomes.iter().all(|o| o.success);
            updated.extend(succeeded_in_order(&tranche, &tranche_outcomes));
            outcomes.extend(tranche_outcomes);

            if !tranche_ok {
                let reason = if cancel.is_cancelled() {
                    "rollout cancelled".to_string()
                } else {
                    format!("node apply failed in wave {wave}")
                };
                return Ok(revert(ctx, &updated, outcomes, started, reason).await);
            }

            tokio::select! {
                _ = tokio::time::sleep(soak) => {}
                _ = cancel.cancelled() => {
                    return Ok(revert(ctx, &updated, outcomes, started, "rollout cancelled").await);
                }
            }

            // Evaluate every node updated so far, not just this tranche.
            let current = ctx.fresh_snapshot(&updated).await?;
            if is_degraded(&current, &baseline, &policy) {
                warn!(wave, updated = updated.len(), "canary degraded after soak");
                return Ok(revert(
                    ctx,
                    &updated,
                    outcomes,
                    started,
                    format!("health degraded after wave {wave}"),
                )
                .await);
            }

            info!(wave, updated = updated.len(), "canary wave healthy");
        }

        // Final post-deploy snapshot across the full cluster.
        let post = ctx.fresh_snapshot(&ids).await?;
        if is_degraded(&post, &baseline, &policy) {
            return Ok(revert(
                ctx,
                &updated,
                outcomes,
                started,
                "health degraded after full rollout",
            )
            .await);
        }

        info!(nodes = ids.len(), "canary rollout completed");
        Ok(RolloutResult::succeeded(outcomes, started.elapsed()))
    }

    async fn rollback(
        &self,
        ctx: &RolloutContext,
        _cancel: &CancellationToken,
    ) -> Result<RolloutResult> {
        let started = Instant::now();
        let updated = ctx.nodes_running_artifact().await?;
        Ok(revert(ctx, &updated, Vec::new(), started, "cluster rollback requested").await)
    }

    fn name(&self) -> &str {
        "canary"
    }
}

#[cfg(test)]
mod tests {
    use super::wave_targets;

    #[test]
    fn test_wave_targets_twenty_nodes() {
        let targets = wave_targets(&[0.1, 0.3, 0.5, 1.0], 20);
        assert_eq!(targets, vec![2, 6, 10, 20]);
    }

    #[test]
    fn test_wave_targets_tiny_cluster_coalesce() {
        let targets = wave_targets(&[0.1, 0.3, 0.5, 1.0], 3);
        assert_eq!(targets, vec![1, 2, 3]);
    }

    #[test]
    fn test_wave_targets_single_node() {
        let targets = wave_targets(&[0.1, 0.3, 0.5, 1.0], 1);
        assert_eq!(targets, vec![1]);
    }

    #[test]
    fn test_final_wave_covers_remainder() {
        let targets = wave_targets(&[0.1, 0.5], 10);
        assert_eq!(targets, vec![1, 5, 10]);
    }
}
