//! The approval gate

use crate::error::{ApprovalError, Result};
use crate::store::ApprovalStore;
use async_trait::async_trait;
use chrono::Utc;
use convoy_lock::{LockGuard, LockManager};
use convoy_types::{
    ApprovalConfig, ApprovalId, ApprovalRequest, ApprovalStatus, ArtifactRef, ConvoyEvent,
    ConvoyEventEnvelope, Environment, ExecutionId,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const TRANSITION_LOCK_TTL: Duration = Duration::from_secs(30);
const TRANSITION_LOCK_WAIT: Duration = Duration::from_secs(5);
const TRANSITION_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Approver notification capability (chat, email, pager; a collaborator
/// concern).
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn notify(&self, approval: &ApprovalRequest);
}

/// Notifier that drops notifications; useful in tests and single-box runs.
pub struct NoopNotifier;

#[async_trait]
impl ApprovalNotifier for NoopNotifier {
    async fn notify(&self, _approval: &ApprovalRequest) {}
}

/// Addressing for decisions: administrators act by approval id or by
/// execution id.
#[derive(Debug, Clone)]
pub enum ApprovalKey {
    Approval(ApprovalId),
    Execution(ExecutionId),
}

impl From<ApprovalId> for ApprovalKey {
    fn from(id: ApprovalId) -> Self {
        ApprovalKey::Approval(id)
    }
}

impl From<ExecutionId> for ApprovalKey {
    fn from(id: ExecutionId) -> Self {
        ApprovalKey::Execution(id)
    }
}

/// Creates, adjudicates and awaits approvals.
pub struct ApprovalGate {
    store: Arc<dyn ApprovalStore>,
    locks: Arc<dyn LockManager>,
    notifier: Arc<dyn ApprovalNotifier>,
    config: ApprovalConfig,
    waiters: DashMap<ApprovalId, Arc<Notify>>,
    event_tx: broadcast::Sender<ConvoyEventEnvelope>,
}

impl ApprovalGate {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        locks: Arc<dyn LockManager>,
        notifier: Arc<dyn ApprovalNotifier>,
        config: ApprovalConfig,
        event_tx: broadcast::Sender<ConvoyEventEnvelope>,
    ) -> Self {
        Self {
            store,
            locks,
            notifier,
            config,
            waiters: DashMap::new(),
            event_tx,
        }
    }

    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }

    /// Create a Pending approval for an execution, or return the existing
    /// one. At most one approval exists per execution.
    #[instrument(skip(self, artifact), fields(execution_id = %execution_id))]
    pub async fn request_approval(
        &self,
        execution_id: ExecutionId,
        requester: &str,
        environment: Environment,
        artifact: ArtifactRef,
        timeout_override: Option<Duration>,
    ) -> Result<ApprovalRequest> {
        if let Some(existing) = self.store.get_by_execution(&execution_id).await? {
            return Ok(existing);
        }

        let timeout = timeout_override.unwrap_or_else(|| self.config.timeout());
        let approval = ApprovalRequest::new(
            execution_id.clone(),
            requester,
            environment,
            artifact,
            timeout,
        );

        match self.store.insert(approval.clone()).await {
            Ok(()) => {}
            Err(_) => {
                // Lost a creation race; the winner's record is authoritative.
                if let Some(existing) = self.store.get_by_execution(&execution_id).await? {
                    return Ok(existing);
                }
                return Err(ApprovalError::Store(
                    "approval insert failed with no existing record".into(),
                ));
            }
        }

        self.notifier.notify(&approval).await;
        self.emit(ConvoyEvent::ApprovalCreated {
            approval_id: approval.approval_id.clone(),
            execution_id,
            environment,
        });
        info!(
            approval_id = %approval.approval_id,
            environment = %environment,
            expires_at = %approval.expires_at,
            "approval requested"
        );
        Ok(approval)
    }

    /// Await the decision for an execution's approval.
    ///
    /// Cooperative: registers a waiter, re-reads the store after every
    /// wakeup, and expires the record itself if it observes the deadline
    /// pass before the sweeper does.
    pub async fn await_decision(
        &self,
        execution_id: &ExecutionId,
        cancel: &CancellationToken,
    ) -> Result<ApprovalStatus> {
        let approval = self
            .store
            .get_by_execution(execution_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFoundByExecution(execution_id.clone()))?;
        let approval_id = approval.approval_id.clone();

        let notify = self
            .waiters
            .entry(approval_id.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        loop {
            // Register interest before reading so a resolution landing
            // between the read and the await still wakes us.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let current = self
                .store
                .get(&approval_id)
                .await?
                .ok_or_else(|| ApprovalError::NotFound(approval_id.clone()))?;
            if current.status.is_resolved() {
                return Ok(current.status);
            }

            let now = Utc::now();
            if current.is_expired_at(now) {
                self.expire(&approval_id).await?;
                continue;
            }

            let until_expiry = (current.expires_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(until_expiry) => {}
                _ = cancel.cancelled() => return Err(ApprovalError::Cancelled),
            }
        }
    }

    /// Approve; fails with `AlreadyResolved` on a duplicate or late call.
    pub async fn approve(
        &self,
        key: impl Into<ApprovalKey>,
        resolver: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRequest> {
        self.decide(key.into(), ApprovalStatus::Approved, resolver, reason)
            .await
    }

    /// Reject; fails with `AlreadyResolved` on a duplicate or late call.
    pub async fn reject(
        &self,
        key: impl Into<ApprovalKey>,
        resolver: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRequest> {
        self.decide(key.into(), ApprovalStatus::Rejected, resolver, reason)
            .await
    }

    /// Read an approval by either key.
    pub async fn get(&self, key: impl Into<ApprovalKey>) -> Result<Option<ApprovalRequest>> {
        match key.into() {
            ApprovalKey::Approval(id) => self.store.get(&id).await,
            ApprovalKey::Execution(id) => self.store.get_by_execution(&id).await,
        }
    }

    async fn decide(
        &self,
        key: ApprovalKey,
        status: ApprovalStatus,
        resolver: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRequest> {
        let approval = match &key {
            ApprovalKey::Approval(id) => self
                .store
                .get(id)
                .await?
                .ok_or_else(|| ApprovalError::NotFound(id.clone()))?,
            ApprovalKey::Execution(id) => self
                .store
                .get_by_execution(id)
                .await?
                .ok_or_else(|| ApprovalError::NotFoundByExecution(id.clone()))?,
        };
        let approval_id = approval.approval_id.clone();

        let guard = self.transition_lock(&approval_id).await?;
        let mut current = self
            .store
            .get(&approval_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(approval_id.clone()))?;

        if current.status.is_resolved() {
            guard.release();
            return Err(ApprovalError::AlreadyResolved {
                approval_id,
                status: current.status,
            });
        }

        let now = Utc::now();
        if current.is_expired_at(now) {
            // The deadline passed before this decision; expiry wins.
            current.status = ApprovalStatus::Expired;
            current.resolved_at = Some(now);
            self.store.update(&current).await?;
            guard.release();
            self.wake(&approval_id);
            self.emit_resolved(&current);
            warn!(approval_id = %approval_id, "decision arrived after expiry");
            return Err(ApprovalError::AlreadyResolved {
                approval_id,
                status: ApprovalStatus::Expired,
            });
        }

        current.status = status;
        current.resolver = Some(resolver.to_string());
        current.reason = reason;
        current.resolved_at = Some(now);
        self.store.update(&current).await?;
        guard.release();
        self.wake(&approval_id);
        self.emit_resolved(&current);
        info!(
            approval_id = %approval_id,
            status = %current.status,
            resolver = %resolver,
            "approval resolved"
        );
        Ok(current)
    }

    /// Transition an overdue Pending approval to Expired. Returns whether
    /// this call performed the transition. Used by waiters and the sweeper;
    /// both paths are idempotent.
    pub(crate) async fn expire(&self, approval_id: &ApprovalId) -> Result<bool> {
        let guard = self.transition_lock(approval_id).await?;
        let mut current = self
            .store
            .get(approval_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(approval_id.clone()))?;

        let now = Utc::now();
        if !current.is_expired_at(now) {
            guard.release();
            return Ok(false);
        }

        current.status = ApprovalStatus::Expired;
        current.resolved_at = Some(now);
        self.store.update(&current).await?;
        guard.release();
        self.wake(approval_id);
        self.emit_resolved(&current);
        info!(approval_id = %approval_id, "approval expired");
        Ok(true)
    }

    pub(crate) fn store(&self) -> &Arc<dyn ApprovalStore> {
        &self.store
    }

    /// Per-approval critical section; one retry after a short backoff.
    async fn transition_lock(&self, approval_id: &ApprovalId) -> Result<LockGuard> {
        let name = format!("approval:{approval_id}");
        match self
            .locks
            .acquire(&name, TRANSITION_LOCK_TTL, TRANSITION_LOCK_WAIT)
            .await
        {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tokio::time::sleep(TRANSITION_RETRY_BACKOFF).await;
                self.locks
                    .acquire(&name, TRANSITION_LOCK_TTL, TRANSITION_LOCK_WAIT)
                    .await
                    .map_err(|_| ApprovalError::LockContention(approval_id.clone()))
            }
        }
    }

    fn wake(&self, approval_id: &ApprovalId) {
        if let Some(notify) = self.waiters.get(approval_id) {
            notify.notify_waiters();
        }
    }

    fn emit_resolved(&self, approval: &ApprovalRequest) {
        self.emit(ConvoyEvent::ApprovalResolved {
            approval_id: approval.approval_id.clone(),
            execution_id: approval.execution_id.clone(),
            status: approval.status,
        });
    }

    fn emit(&self, event: ConvoyEvent) {
        let _ = self.event_tx.send(ConvoyEventEnvelope::new(event, None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryApprovalStore;
    use convoy_lock::InMemoryLockManager;
    use semver::Version;

    fn gate() -> Arc<ApprovalGate> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(ApprovalGate::new(
            Arc::new(InMemoryApprovalStore::new()),
            Arc::new(InMemoryLockManager::new()),
            Arc::new(NoopNotifier),
            ApprovalConfig::default(),
            event_tx,
        ))
    }

    fn artifact() -> ArtifactRef {
        ArtifactRef {
            name: "payments".into(),
            version: Version::new(1, 0, 0),
        }
    }

    async fn pending(gate: &ApprovalGate, timeout: Duration) -> ApprovalRequest {
        gate.request_approval(
            ExecutionId::generate(),
            "dev@example.com",
            Environment::Staging,
            artifact(),
            Some(timeout),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_is_idempotent_per_execution() {
        let gate = gate();
        let execution_id = ExecutionId::generate();
        let first = gate
            .request_approval(
                execution_id.clone(),
                "dev@example.com",
                Environment::Staging,
                artifact(),
                None,
            )
            .await
            .unwrap();
        let second = gate
            .request_approval(
                execution_id,
                "dev@example.com",
                Environment::Staging,
                artifact(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(first.approval_id, second.approval_id);
    }

    #[tokio::test]
    async fn test_approve_wakes_waiter() {
        let gate = gate();
        let approval = pending(&gate, Duration::from_secs(3600)).await;
        let execution_id = approval.execution_id.clone();

        let waiter = {
            let gate = gate.clone();
            let execution_id = execution_id.clone();
            tokio::spawn(async move {
                gate.await_decision(&execution_id, &CancellationToken::new())
                    .await
            })
        };

        tokio::task::yield_now().await;
        let resolved = gate
            .approve(execution_id, "admin@example.com", Some("looks good".into()))
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolver.as_deref(), Some("admin@example.com"));

        let status = waiter.await.unwrap().unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_all_waiters_wake() {
        let gate = gate();
        let approval = pending(&gate, Duration::from_secs(3600)).await;

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            let execution_id = approval.execution_id.clone();
            waiters.push(tokio::spawn(async move {
                gate.await_decision(&execution_id, &CancellationToken::new())
                    .await
            }));
        }

        tokio::task::yield_now().await;
        gate.reject(approval.execution_id.clone(), "admin@example.com", None)
            .await
            .unwrap();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), ApprovalStatus::Rejected);
        }
    }

    #[tokio::test]
    async fn test_duplicate_decision_fails() {
        let gate = gate();
        let approval = pending(&gate, Duration::from_secs(3600)).await;

        gate.approve(approval.execution_id.clone(), "admin@example.com", None)
            .await
            .unwrap();
        let second = gate
            .reject(approval.execution_id.clone(), "admin2@example.com", None)
            .await;
        assert!(matches!(
            second,
            Err(ApprovalError::AlreadyResolved {
                status: ApprovalStatus::Approved,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_expiry_beats_late_decision() {
        let gate = gate();
        let approval = pending(&gate, Duration::from_millis(50)).await;

        // Let the wall-clock deadline pass; expiry is wall-time based.
        tokio::time::sleep(Duration::from_millis(80)).await;

        let late = gate
            .approve(approval.execution_id.clone(), "admin@example.com", None)
            .await;
        assert!(matches!(
            late,
            Err(ApprovalError::AlreadyResolved {
                status: ApprovalStatus::Expired,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_await_observes_expiry() {
        let gate = gate();
        let approval = pending(&gate, Duration::from_millis(50)).await;

        let status = gate
            .await_decision(&approval.execution_id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn test_cancelled_await() {
        let gate = gate();
        let approval = pending(&gate, Duration::from_secs(3600)).await;
        let cancel = CancellationToken::new();

        let waiter = {
            let gate = gate.clone();
            let execution_id = approval.execution_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.await_decision(&execution_id, &cancel).await })
        };

        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ApprovalError::Cancelled)
        ));
    }
}
