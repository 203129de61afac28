//! Live execution board
//!
//! Readers (the orchestrator's `get`) need the current stage statuses of a
//! running pipeline. The pipeline posts a snapshot here after every stage
//! transition; the entry is dropped at close-out, when the tracker owns
//! the terminal state.

use convoy_types::{ExecutionId, PipelineExecution};
use dashmap::DashMap;

#[derive(Default)]
pub struct ExecutionBoard {
    live: DashMap<ExecutionId, PipelineExecution>,
}

impl ExecutionBoard {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
        }
    }

    pub fn post(&self, execution: &PipelineExecution) {
        self.live
            .insert(execution.execution_id.clone(), execution.clone());
    }

    pub fn get(&self, execution_id: &ExecutionId) -> Option<PipelineExecution> {
        self.live.get(execution_id).map(|e| e.clone())
    }

    pub fn remove(&self, execution_id: &ExecutionId) {
        self.live.remove(execution_id);
    }
}
