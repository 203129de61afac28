//! Pipeline execution state
//!
//! One `PipelineExecution` exists per accepted submission. The pipeline is
//! its only mutator while running; the tracker owns the terminal state.

use crate::artifact::ArtifactRef;
use crate::environment::Environment;
use crate::ids::{ExecutionId, NodeId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed, ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Build,
    Test,
    SecurityScan,
    Deploy,
    Validate,
}

impl PipelineStage {
    /// Stage order as executed.
    pub const ORDER: [PipelineStage; 5] = [
        PipelineStage::Build,
        PipelineStage::Test,
        PipelineStage::SecurityScan,
        PipelineStage::Deploy,
        PipelineStage::Validate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Build => "build",
            PipelineStage::Test => "test",
            PipelineStage::SecurityScan => "security-scan",
            PipelineStage::Deploy => "deploy",
            PipelineStage::Validate => "validate",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    RolledBack,
}

/// Record for one stage of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl Default for StageRecord {
    fn default() -> Self {
        Self {
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            message: None,
        }
    }
}

/// Overall execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

/// Full state of one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub execution_id: ExecutionId,
    pub trace_id: TraceId,
    pub environment: Environment,
    /// Identity of the artifact being promoted.
    pub artifact: ArtifactRef,
    pub status: ExecutionStatus,
    /// Stage records in execution order, parallel to `PipelineStage::ORDER`.
    stages: Vec<StageRecord>,
    pub current_stage: Option<PipelineStage>,
    /// Human-readable reason for the terminal status.
    pub message: Option<String>,
    /// Nodes whose rollback failed; operator attention required.
    pub inconsistent_nodes: Vec<NodeId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineExecution {
    pub fn new(
        execution_id: ExecutionId,
        trace_id: TraceId,
        environment: Environment,
        artifact: ArtifactRef,
    ) -> Self {
        Self {
            execution_id,
            trace_id,
            environment,
            artifact,
            status: ExecutionStatus::Running,
            stages: PipelineStage::ORDER.iter().map(|_| StageRecord::default()).collect(),
            current_stage: None,
            message: None,
            inconsistent_nodes: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    fn index(stage: PipelineStage) -> usize {
        PipelineStage::ORDER
            .iter()
            .position(|s| *s == stage)
            .unwrap_or(0)
    }

    pub fn stage(&self, stage: PipelineStage) -> &StageRecord {
        &self.stages[Self::index(stage)]
    }

    /// Iterate stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = (PipelineStage, &StageRecord)> {
        PipelineStage::ORDER
            .iter()
            .copied()
            .zip(self.stages.iter())
    }

    pub fn mark_stage_running(&mut self, stage: PipelineStage) {
        self.current_stage = Some(stage);
        let record = &mut self.stages[Self::index(stage)];
        record.status = StageStatus::Running;
        record.started_at = Some(Utc::now());
    }

    pub fn finish_stage(
        &mut self,
        stage: PipelineStage,
        status: StageStatus,
        message: Option<String>,
    ) {
        let record = &mut self.stages[Self::index(stage)];
        record.status = status;
        record.ended_at = Some(Utc::now());
        record.message = message;
    }

    /// Mark every stage after `failed` as skipped; Pending stages only.
    pub fn skip_remaining_after(&mut self, failed: PipelineStage, reason: Option<String>) {
        let from = Self::index(failed) + 1;
        for record in self.stages.iter_mut().skip(from) {
            if record.status == StageStatus::Pending {
                record.status = StageStatus::Skipped;
                record.message = reason.clone();
            }
        }
    }

    pub fn finish(&mut self, status: ExecutionStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
        self.ended_at = Some(Utc::now());
        self.current_stage = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn execution() -> PipelineExecution {
        PipelineExecution::new(
            ExecutionId::generate(),
            TraceId::generate(),
            Environment::Development,
            ArtifactRef {
                name: "payments".into(),
                version: Version::new(1, 0, 0),
            },
        )
    }

    #[test]
    fn test_new_execution_all_pending() {
        let exec = execution();
        assert_eq!(exec.status, ExecutionStatus::Running);
        for (_, record) in exec.stages() {
            assert_eq!(record.status, StageStatus::Pending);
        }
    }

    #[test]
    fn test_skip_remaining_after_failure() {
        let mut exec = execution();
        exec.mark_stage_running(PipelineStage::Build);
        exec.finish_stage(PipelineStage::Build, StageStatus::Succeeded, None);
        exec.mark_stage_running(PipelineStage::Test);
        exec.finish_stage(
            PipelineStage::Test,
            StageStatus::Failed,
            Some("unit tests failed".into()),
        );
        exec.skip_remaining_after(PipelineStage::Test, Some("test stage failed".into()));

        assert_eq!(exec.stage(PipelineStage::Build).status, StageStatus::Succeeded);
        assert_eq!(exec.stage(PipelineStage::Test).status, StageStatus::Failed);
        assert_eq!(
            exec.stage(PipelineStage::SecurityScan).status,
            StageStatus::Skipped
        );
        assert_eq!(exec.stage(PipelineStage::Deploy).status, StageStatus::Skipped);
        assert_eq!(exec.stage(PipelineStage::Validate).status, StageStatus::Skipped);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::RolledBack.is_terminal());
    }
}
