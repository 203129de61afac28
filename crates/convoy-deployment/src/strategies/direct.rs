//! Direct rollout strategy
//!
//! Development clusters: apply to every node at once (bounded), revert
//! everything on the first failure. Fastest feedback, no staged safety.

use super::{revert, succeeded_in_order};
use crate::context::RolloutContext;
use crate::error::Result;
use crate::executor::{RolloutResult, RolloutStrategy};
use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub struct DirectStrategy;

#[async_trait]
impl RolloutStrategy for DirectStrategy {
    #[instrument(skip_all, fields(environment = %ctx.environment(), artifact = %ctx.artifact()))]
    async fn deploy(
        &self,
        ctx: &RolloutContext,
        cancel: &CancellationToken,
    ) -> Result<RolloutResult> {
        let started = Instant::now();
        let ids = ctx.node_ids();
        if ids.is_empty() {
            return Ok(RolloutResult::no_op(started.elapsed()));
        }

        info!(nodes = ids.len(), "starting direct rollout");

        let outcomes = ctx.apply_many(&ids, cancel).await;
        let updated = succeeded_in_order(&ids, &outcomes);
        let all_applied = outcomes.iter().all(|o| o.success);

        if all_applied && !cancel.is_cancelled() {
            info!(nodes = ids.len(), "direct rollout completed");
            return Ok(RolloutResult::succeeded(outcomes, started.elapsed()));
        }

        let reason = if cancel.is_cancelled() {
            "rollout cancelled".to_string()
        } else {
            "node apply failed".to_string()
        };
        Ok(revert(ctx, &updated, outcomes, started, reason).await)
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
        "direct"
    }
}
