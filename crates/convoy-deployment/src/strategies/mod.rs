//! Rollout strategy implementations

pub mod blue_green;
pub mod canary;
pub mod direct;
pub mod rolling;

pub use blue_green::BlueGreenStrategy;
pub use canary::CanaryStrategy;
pub use direct::DirectStrategy;
pub use rolling::RollingStrategy;

use crate::context::RolloutContext;
use crate::executor::{NodeOutcome, RolloutResult, RolloutStrategy};
use convoy_types::{NodeId, StrategyKind};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

/// Factory mapping an environment's strategy kind to an executor.
pub fn create_strategy(kind: StrategyKind) -> Arc<dyn RolloutStrategy> {
    match kind {
        StrategyKind::Direct => Arc::new(DirectStrategy),
        StrategyKind::Rolling => Arc::new(RollingStrategy),
        StrategyKind::BlueGreen => Arc::new(BlueGreenStrategy),
        StrategyKind::Canary => Arc::new(CanaryStrategy),
    }
}

/// Successfully applied node ids, preserved in the order they were
/// targeted. Fan-out finishes out of order; rollback needs update order.
pub(crate) fn succeeded_in_order(order: &[NodeId], outcomes: &[NodeOutcome]) -> Vec<NodeId> {
    let ok: HashSet<&NodeId> = outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| &o.node_id)
        .collect();
    order.iter().filter(|id| ok.contains(id)).cloned().collect()
}

/// Roll back `updated` (reverse order of update) and fold the rollback
/// outcomes into the result: `RolledBack` when the cluster was fully
/// restored, `Failed` with the inconsistent nodes when it was not.
pub(crate) async fn revert(
    ctx: &RolloutContext,
    updated: &[NodeId],
    mut outcomes: Vec<NodeOutcome>,
    started: Instant,
    reason: impl Into<String>,
) -> RolloutResult {
    let reason = reason.into();
    let (rollback_outcomes, inconsistent) = ctx.rollback_reverse(updated).await;
    outcomes.extend(rollback_outcomes);
    if inconsistent.is_empty() {
        RolloutResult::rolled_back(outcomes, started.elapsed(), reason)
    } else {
        RolloutResult::failed(
            outcomes,
            inconsistent,
            started.elapsed(),
            format!("{reason}; rollback incomplete"),
        )
    }
}
