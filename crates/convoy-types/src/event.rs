//! Orchestration events
//!
//! Broadcast to subscribers (observability collaborators, tests). Emission
//! is best-effort: a lagging subscriber loses events, never blocks the
//! emitter.

use crate::approval::ApprovalStatus;
use crate::environment::Environment;
use crate::execution::{ExecutionStatus, PipelineStage, StageStatus};
use crate::ids::{ApprovalId, ExecutionId, NodeId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events emitted by the engine, pipeline and gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConvoyEvent {
    SubmissionAccepted {
        execution_id: ExecutionId,
        environment: Environment,
    },

    StageStarted {
        execution_id: ExecutionId,
        stage: PipelineStage,
    },

    StageFinished {
        execution_id: ExecutionId,
        stage: PipelineStage,
        status: StageStatus,
    },

    ApprovalCreated {
        approval_id: ApprovalId,
        execution_id: ExecutionId,
        environment: Environment,
    },

    ApprovalResolved {
        approval_id: ApprovalId,
        execution_id: ExecutionId,
        status: ApprovalStatus,
    },

    RollbackStarted {
        execution_id: ExecutionId,
        environment: Environment,
    },

    NodeInconsistent {
        node_id: NodeId,
        environment: Environment,
    },

    ExecutionClosed {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },
}

/// Envelope attaching time and correlation to an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoyEventEnvelope {
    pub event: ConvoyEvent,
    pub occurred_at: DateTime<Utc>,
    pub trace_id: Option<TraceId>,
}

impl ConvoyEventEnvelope {
    pub fn new(event: ConvoyEvent, trace_id: Option<TraceId>) -> Self {
        Self {
            event,
            occurred_at: Utc::now(),
            trace_id,
        }
    }
}
