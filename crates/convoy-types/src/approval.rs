//! Approval records
//!
//! One approval exists per gated execution (the execution id is the unique
//! key). The gate mutates status; the pipeline only reads. Resolved records
//! are retained for audit until the retention sweep drops them.

use crate::artifact::ArtifactRef;
use crate::environment::Environment;
use crate::ids::{ApprovalId, ExecutionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Approval lifecycle status. Transitions only out of Pending, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A request for human sign-off on one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: ApprovalId,
    pub execution_id: ExecutionId,
    pub requester: String,
    pub environment: Environment,
    pub artifact: ArtifactRef,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Administrator who resolved the approval, when resolved by a person.
    pub resolver: Option<String>,
    /// Free-form decision reason.
    pub reason: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        execution_id: ExecutionId,
        requester: impl Into<String>,
        environment: Environment,
        artifact: ArtifactRef,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        Self {
            approval_id: ApprovalId::generate(),
            execution_id,
            requester: requester.into(),
            environment,
            artifact,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at,
            resolver: None,
            reason: None,
            resolved_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now >= self.expires_at
    }
}
