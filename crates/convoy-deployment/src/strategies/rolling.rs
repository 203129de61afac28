//! Rolling rollout strategy
//!
//! QA clusters: fixed-size batches, strictly sequential. Batch *i*+1 starts
//! only after every node updated in batch *i* reports Healthy. Any failure
//! reverts the failing batch and all previously updated batches in reverse
//! order of update.

use super::{revert, succeeded_in_order};
use crate::context::RolloutContext;
use crate::error::Result;
use crate::executor::{RolloutResult, RolloutStrategy};
use async_trait::async_trait;
use convoy_types::NodeId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub struct RollingStrategy;

#[async_trait]
impl RolloutStrategy for RollingStrategy {
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

        // A batch size beyond the cluster degenerates to one full batch;
        // the health step still runs.
        let batch_size = ctx.config().rolling.batch_size.max(1);
        let health_timeout = ctx.config().rolling.batch_health_timeout();

        info!(
            nodes = ids.len(),
            batch_size,
            "starting rolling rollout"
        );

        let mut outcomes = Vec::with_capacity(ids.len());
        let mut updated: Vec<NodeId> = Vec::new();

        for (index, batch) in ids.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Ok(revert(ctx, &updated, outcomes, started, "rollout cancelled").await);
            }

            let batch_outcomes = ctx.apply_many(batch, cancel).await;
            let batch_ok = batch_outcomes.iter().all(|o| o.success);
            updated.extend(succeeded_in_order(batch, &batch_outcomes));
            outcomes.extend(batch_outcomes);

            if !batch_ok {
                let reason = if cancel.is_cancelled() {
                    "rollout cancelled".to_string()
                } else {
                    format!("node apply failed in batch {}", index + 1)
                };
                return Ok(revert(ctx, &updated, outcomes, started, reason).await);
            }

            let healthy = ctx
                .wait_until_healthy(batch, health_timeout, cancel)
                .await?;
            if !healthy {
                let reason = if cancel.is_cancelled() {
                    "rollout cancelled".to_string()
                } else {
                    format!("batch {} did not come back healthy", index + 1)
                };
                return Ok(revert(ctx, &updated, outcomes, started, reason).await);
            }

            info!(batch = index + 1, updated = updated.len(), "batch healthy");
        }

        info!(nodes = ids.len(), "rolling rollout completed");
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
        "rolling"
    }
}
