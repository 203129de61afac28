//! The deployment tracker

use crate::cache::TtlStore;
use crate::error::{Result, TrackerError};
use convoy_lock::LockManager;
use convoy_types::{DeploymentRequest, ExecutionId, PipelineExecution, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

const CLOSE_OUT_LOCK_TTL: Duration = Duration::from_secs(30);
const CLOSE_OUT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// One page of listed results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Offset of the next page, absent on the last page.
    pub next_offset: Option<usize>,
}

/// Tracks in-progress executions and terminal results by execution id.
pub struct DeploymentTracker {
    in_progress: TtlStore<DeploymentRequest>,
    results: TtlStore<PipelineExecution>,
    locks: Arc<dyn LockManager>,
}

impl DeploymentTracker {
    pub fn new(config: &TrackerConfig, locks: Arc<dyn LockManager>) -> Self {
        Self {
            in_progress: TtlStore::new(config.in_progress_ttl()),
            results: TtlStore::new(config.result_ttl()),
            locks,
        }
    }

    /// Idempotent insert of an accepted request.
    pub fn track_in_progress(&self, request: DeploymentRequest) {
        self.in_progress
            .insert(request.execution_id.clone(), request);
    }

    /// Idempotent insert of a terminal state. Prefer
    /// [`store_result_and_clear_in_progress`]; this exists for re-recording
    /// an identical terminal state.
    ///
    /// [`store_result_and_clear_in_progress`]: Self::store_result_and_clear_in_progress
    pub fn store_result(&self, state: PipelineExecution) {
        self.results.insert(state.execution_id.clone(), state);
    }

    /// Idempotent delete of an in-progress entry. Not a close-out: an
    /// execution that produced a result must go through the atomic
    /// operation instead.
    pub fn remove_in_progress(&self, execution_id: &ExecutionId) {
        self.in_progress.remove(execution_id);
    }

    /// The only supported close-out: record the terminal state and drop the
    /// in-progress entry in one critical section, so a concurrent reader
    /// never finds the execution in both stores or in neither.
    #[instrument(skip(self, state), fields(execution_id = %state.execution_id))]
    pub async fn store_result_and_clear_in_progress(
        &self,
        state: PipelineExecution,
    ) -> Result<()> {
        let execution_id = state.execution_id.clone();
        let guard = self
            .locks
            .acquire(
                &format!("tracker:{execution_id}"),
                CLOSE_OUT_LOCK_TTL,
                CLOSE_OUT_LOCK_WAIT,
            )
            .await
            .map_err(|_| TrackerError::CloseOutContended(execution_id.clone()))?;

        self.results.insert(execution_id.clone(), state);
        self.in_progress.remove(&execution_id);
        guard.release();

        info!(execution_id = %execution_id, "execution closed out");
        Ok(())
    }

    pub fn get_result(&self, execution_id: &ExecutionId) -> Option<PipelineExecution> {
        self.results.get(execution_id)
    }

    pub fn get_in_progress(&self, execution_id: &ExecutionId) -> Option<DeploymentRequest> {
        self.in_progress.get(execution_id)
    }

    /// Page over terminal results.
    pub fn list_results(&self, offset: usize, limit: usize) -> Page<PipelineExecution> {
        let mut all: Vec<PipelineExecution> = self
            .results
            .collect_live()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let items: Vec<PipelineExecution> =
            all.iter().skip(offset).take(limit).cloned().collect();
        let next_offset = if offset + items.len() < all.len() {
            Some(offset + items.len())
        } else {
            None
        };
        Page { items, next_offset }
    }

    pub fn list_in_progress(&self) -> Vec<DeploymentRequest> {
        self.in_progress
            .collect_live()
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    /// One eviction pass over both id-sets.
    pub fn evict_stale_ids(&self) -> usize {
        self.in_progress.evict_stale_ids() + self.results.evict_stale_ids()
    }
}
