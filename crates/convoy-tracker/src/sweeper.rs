//! Tracker eviction sweeper
//!
//! Removes id-set entries whose cache entries already expired, keeping the
//! id-sets from growing without bound. Safe to run on multiple instances;
//! eviction is idempotent.

use crate::tracker::DeploymentTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct TrackerSweeper {
    tracker: Arc<DeploymentTracker>,
    interval: Duration,
}

impl TrackerSweeper {
    pub fn new(tracker: Arc<DeploymentTracker>, interval: Duration) -> Self {
        Self { tracker, interval }
    }

    /// Spawn the sweep loop; it runs until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval = ?self.interval, "tracker sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.tracker.evict_stale_ids();
                        if evicted > 0 {
                            debug!(evicted, "evicted stale tracker ids");
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("tracker sweeper stopped");
                        return;
                    }
                }
            }
        })
    }
}
