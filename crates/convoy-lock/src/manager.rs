//! Lock manager trait and the in-memory implementation

use crate::error::{LockError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Ceiling on the polling cadence of blocking acquisition.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Backend hook guards release through. Release must be cheap and
/// non-blocking; backends that need I/O to unlock enqueue it here.
pub trait LockBackend: Send + Sync {
    /// Remove the named lock if `holder` still owns it. Returns whether a
    /// lock was actually released.
    fn release(&self, name: &str, holder: Uuid) -> bool;
}

/// Handle to a held lock.
///
/// `release` is idempotent and owner-checked; dropping the guard releases
/// as well. A guard that is neither released nor dropped (crashed holder)
/// is bounded by the lock TTL.
pub struct LockGuard {
    name: String,
    holder: Uuid,
    backend: Arc<dyn LockBackend>,
    released: AtomicBool,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock. The second and later calls are no-ops.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let freed = self.backend.release(&self.name, self.holder);
            if !freed {
                // TTL already reclaimed it; nothing to do.
                debug!(name = %self.name, "lock was already reclaimed at release");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}

/// Named-resource lock capability.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Acquire `name`, waiting up to `wait_timeout`. `Err(Contended)` when
    /// the wait lapses without acquisition.
    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        wait_timeout: Duration,
    ) -> Result<LockGuard>;

    /// Single acquisition attempt without waiting.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>>;
}

struct LockEntry {
    holder: Uuid,
    expires_at: Instant,
}

/// In-process lock manager.
///
/// Correct for single-instance deployments only; multiple process instances
/// must share a backing store instead.
pub struct InMemoryLockManager {
    locks: Arc<Locks>,
}

struct Locks {
    entries: DashMap<String, LockEntry>,
}

impl LockBackend for Locks {
    fn release(&self, name: &str, holder: Uuid) -> bool {
        self.entries
            .remove_if(name, |_, entry| entry.holder == holder)
            .is_some()
    }
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Locks {
                entries: DashMap::new(),
            }),
        }
    }

    fn attempt(&self, name: &str, ttl: Duration) -> Option<LockGuard> {
        let holder = Uuid::new_v4();
        let now = Instant::now();

        let mut acquired = false;
        let mut entry = self
            .locks
            .entries
            .entry(name.to_string())
            .or_insert_with(|| {
                acquired = true;
                LockEntry {
                    holder,
                    expires_at: now + ttl,
                }
            });

        if !acquired {
            // Occupied: take over only if the holder's TTL lapsed.
            if entry.expires_at <= now {
                warn!(name = %name, "lock holder TTL lapsed, reclaiming");
                entry.holder = holder;
                entry.expires_at = now + ttl;
                acquired = true;
            }
        }
        drop(entry);

        if acquired {
            Some(LockGuard {
                name: name.to_string(),
                holder,
                backend: self.locks.clone(),
                released: AtomicBool::new(false),
            })
        } else {
            None
        }
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        wait_timeout: Duration,
    ) -> Result<LockGuard> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            if let Some(guard) = self.attempt(name, ttl) {
                return Ok(guard);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Contended {
                    name: name.to_string(),
                });
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(POLL_INTERVAL)).await;
        }
    }

    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        Ok(self.attempt(name, ttl))
    }
}
