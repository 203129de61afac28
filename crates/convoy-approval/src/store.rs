//! Approval store capability and the in-memory implementation
//!
//! The store is the persistence seam: single-instance runs use the
//! in-memory map, multi-instance deployments back this trait with a shared
//! database so approvals survive restarts and are visible to every
//! instance.

use crate::error::{ApprovalError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_types::{ApprovalId, ApprovalRequest, ExecutionId};
use dashmap::DashMap;

/// Persistence capability for approval records.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Insert a new approval. Fails if the execution already has one; the
    /// execution id is a unique key.
    async fn insert(&self, approval: ApprovalRequest) -> Result<()>;

    async fn get(&self, approval_id: &ApprovalId) -> Result<Option<ApprovalRequest>>;

    async fn get_by_execution(&self, execution_id: &ExecutionId)
        -> Result<Option<ApprovalRequest>>;

    /// Full-row update. Only called under the per-approval lock.
    async fn update(&self, approval: &ApprovalRequest) -> Result<()>;

    /// Pending approvals whose expiry has passed as of `now`.
    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>>;

    /// Drop resolved approvals resolved before `cutoff`; returns how many.
    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// In-memory approval store for single-instance runs and tests.
pub struct InMemoryApprovalStore {
    approvals: DashMap<ApprovalId, ApprovalRequest>,
    by_execution: DashMap<ExecutionId, ApprovalId>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self {
            approvals: DashMap::new(),
            by_execution: DashMap::new(),
        }
    }
}

impl Default for InMemoryApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert(&self, approval: ApprovalRequest) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.by_execution.entry(approval.execution_id.clone()) {
            Entry::Occupied(_) => Err(ApprovalError::Store(format!(
                "approval already exists for {}",
                approval.execution_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(approval.approval_id.clone());
                self.approvals
                    .insert(approval.approval_id.clone(), approval);
                Ok(())
            }
        }
    }

    async fn get(&self, approval_id: &ApprovalId) -> Result<Option<ApprovalRequest>> {
        Ok(self.approvals.get(approval_id).map(|a| a.clone()))
    }

    async fn get_by_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ApprovalRequest>> {
        let Some(approval_id) = self.by_execution.get(execution_id).map(|id| id.clone()) else {
            return Ok(None);
        };
        Ok(self.approvals.get(&approval_id).map(|a| a.clone()))
    }

    async fn update(&self, approval: &ApprovalRequest) -> Result<()> {
        if !self.approvals.contains_key(&approval.approval_id) {
            return Err(ApprovalError::NotFound(approval.approval_id.clone()));
        }
        self.approvals
            .insert(approval.approval_id.clone(), approval.clone());
        Ok(())
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>> {
        Ok(self
            .approvals
            .iter()
            .filter(|a| a.is_expired_at(now))
            .map(|a| a.clone())
            .collect())
    }

    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let stale: Vec<(ApprovalId, ExecutionId)> = self
            .approvals
            .iter()
            .filter(|a| {
                a.status.is_resolved()
                    && a.resolved_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|a| (a.approval_id.clone(), a.execution_id.clone()))
            .collect();

        for (approval_id, execution_id) in &stale {
            self.approvals.remove(approval_id);
            self.by_execution.remove(execution_id);
        }
        Ok(stale.len())
    }
}
