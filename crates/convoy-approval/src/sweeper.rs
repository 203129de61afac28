//! Approval expiry sweeper
//!
//! Periodically expires overdue Pending approvals and purges resolved
//! records past the retention window. Safe to run on multiple instances
//! concurrently: transitions are idempotent and guarded by the
//! per-approval lock.

use crate::gate::ApprovalGate;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct ApprovalSweeper {
    gate: Arc<ApprovalGate>,
}

impl ApprovalSweeper {
    pub fn new(gate: Arc<ApprovalGate>) -> Self {
        Self { gate }
    }

    /// Spawn the sweep loop; it runs until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.gate.config().sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval = ?interval, "approval sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    _ = cancel.cancelled() => {
                        info!("approval sweeper stopped");
                        return;
                    }
                }
            }
        })
    }

    /// One sweep pass: expire overdue approvals, purge old resolved rows.
    pub async fn sweep_once(&self) {
        let now = Utc::now();

        match self.gate.store().list_expired_pending(now).await {
            Ok(overdue) => {
                for approval in overdue {
                    match self.gate.expire(&approval.approval_id).await {
                        Ok(true) => {
                            debug!(approval_id = %approval.approval_id, "sweeper expired approval");
                        }
                        // Another instance or a waiter got there first.
                        Ok(false) => {}
                        Err(e) => {
                            error!(approval_id = %approval.approval_id, error = %e, "expiry sweep failed");
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "expired-approval listing failed"),
        }

        let cutoff = now
            - chrono::Duration::from_std(self.gate.config().retention())
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        match self.gate.store().purge_resolved_before(cutoff).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "purged resolved approvals"),
            Err(e) => error!(error = %e, "approval retention purge failed"),
        }
    }
}
