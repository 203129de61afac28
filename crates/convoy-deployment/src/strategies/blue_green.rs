//! Blue-Green rollout strategy
//!
//! Staging clusters: update the standby (Green) pool, exercise it for the
//! smoke phase, then atomically swap the traffic pointer. Any failure
//! before the swap tears Green down and leaves Blue serving.

use super::{revert, succeeded_in_order};
use crate::context::RolloutContext;
use crate::error::Result;
use crate::executor::{RolloutResult, RolloutStrategy};
use async_trait::async_trait;
use convoy_types::{Node, NodeId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub struct BlueGreenStrategy;

#[async_trait]
impl RolloutStrategy for BlueGreenStrategy {
    #[instrument(skip_all, fields(environment = %ctx.environment(), artifact = %ctx.artifact()))]
    async fn deploy(
        &self,
        ctx: &RolloutContext,
        cancel: &CancellationToken,
    ) -> Result<RolloutResult> {
        let started = Instant::now();
        if ctx.nodes().is_empty() {
            return Ok(RolloutResult::no_op(started.elapsed()));
        }

        let serving = ctx.traffic_pointer().await?;
        let standby = serving.other();
        let green_nodes: Vec<Node> = ctx
            .nodes()
            .iter()
            .filter(|n| n.pool == standby)
            .cloned()
            .collect();
        let green_ids: Vec<NodeId> = green_nodes.iter().map(|n| n.id.clone()).collect();

        if green_ids.is_empty() {
            return Ok(RolloutResult::succeeded(Vec::new(), started.elapsed())
                .with_message(format!("standby pool {standby:?} has no nodes")));
        }

        info!(
            serving = ?serving,
            standby = ?standby,
            green_nodes = green_ids.len(),
            "starting blue-green rollout"
        );

        // Phase 1: bring the standby pool up on the new artifact.
        let outcomes = ctx.apply_many(&green_ids, cancel).await;
        let updated = succeeded_in_order(&green_ids, &outcomes);
        let all_applied = outcomes.iter().all(|o| o.success);
        if !all_applied || cancel.is_cancelled() {
            let reason = if cancel.is_cancelled() {
                "rollout cancelled".to_string()
            } else {
                "node apply failed in standby pool".to_string()
            };
            return Ok(revert(ctx, &updated, outcomes, started, reason).await);
        }

        // Phase 2: smoke phase. Green must stay Healthy and pass the
        // synthetic check for the whole window.
        let smoke_deadline = Instant::now() + ctx.config().blue_green.smoke_duration();
        let smoke_interval = ctx.config().blue_green.smoke_interval();
        loop {
            if !ctx.all_healthy(&green_ids).await? {
                return Ok(revert(
                    ctx,
                    &updated,
                    outcomes,
                    started,
                    "standby pool degraded during smoke phase",
                )
                .await);
            }
            if let Err(reason) = ctx.smoke_all(&green_nodes).await {
                return Ok(revert(ctx, &updated, outcomes, started, reason).await);
            }

            let now = Instant::now();
            if now >= smoke_deadline {
                break;
            }
            let step = smoke_interval.min(smoke_deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = cancel.cancelled() => {
                    return Ok(revert(ctx, &updated, outcomes, started, "rollout cancelled").await);
                }
            }
        }

        // Phase 3: the switch. A single capability call; the prior pointer
        // travels in the result so a later rollback can swap back.
        let prior = ctx.switch_traffic(standby).await?;

        info!(
            green_nodes = green_ids.len(),
            from = ?prior,
            to = ?standby,
            "blue-green rollout completed, traffic switched"
        );

        Ok(RolloutResult::succeeded(outcomes, started.elapsed())
            .with_prior_pointer(prior)
            .with_message(format!("traffic switched from {prior:?} to {standby:?}")))
    }

    /// Swap the pointer back, then restore the pool that was updated.
    async fn rollback(
        &self,
        ctx: &RolloutContext,
        _cancel: &CancellationToken,
    ) -> Result<RolloutResult> {
        let started = Instant::now();
        let serving = ctx.traffic_pointer().await?;
        let updated = ctx.nodes_running_artifact().await?;

        if !updated.is_empty() {
            ctx.switch_traffic(serving.other()).await?;
        }
        let result = revert(ctx, &updated, Vec::new(), started, "cluster rollback requested").await;
        Ok(result.with_prior_pointer(serving))
    }

    fn name(&self) -> &str {
        "blue-green"
    }
}
