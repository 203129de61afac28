//! TTL-bounded keyed store with a companion id-set
//!
//! The id-set exists so listing walks known ids instead of scanning the
//! cache. Expiry is lazy: a dead entry is dropped on read, and its id is
//! dropped from the set the next time a list or sweep walks past it.

use convoy_types::ExecutionId;
use dashmap::{DashMap, DashSet};
use std::time::Duration;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Keyed store where every entry lives for a fixed TTL.
pub struct TtlStore<V: Clone> {
    ttl: Duration,
    entries: DashMap<ExecutionId, Entry<V>>,
    ids: DashSet<ExecutionId>,
}

impl<V: Clone> TtlStore<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            ids: DashSet::new(),
        }
    }

    /// Idempotent insert; re-inserting refreshes the TTL.
    pub fn insert(&self, id: ExecutionId, value: V) {
        self.entries.insert(
            id.clone(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.ids.insert(id);
    }

    /// Idempotent delete.
    pub fn remove(&self, id: &ExecutionId) {
        self.entries.remove(id);
        self.ids.remove(id);
    }

    pub fn get(&self, id: &ExecutionId) -> Option<V> {
        let live = match self.entries.get(id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if live.is_none() {
            // Lazy expiry; the id-set entry falls out on the next walk.
            self.entries.remove(id);
        }
        live
    }

    pub fn contains(&self, id: &ExecutionId) -> bool {
        self.get(id).is_some()
    }

    /// Walk the id-set in an unspecified but stable-for-the-walk order,
    /// returning live values and dropping ids whose entries expired.
    pub fn collect_live(&self) -> Vec<(ExecutionId, V)> {
        let ids: Vec<ExecutionId> = self.ids.iter().map(|id| id.clone()).collect();
        let mut live = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id) {
                Some(value) => live.push((id, value)),
                None => {
                    self.ids.remove(&id);
                }
            }
        }
        live
    }

    /// Drop id-set entries whose cache entry already expired.
    pub fn evict_stale_ids(&self) -> usize {
        let ids: Vec<ExecutionId> = self.ids.iter().map(|id| id.clone()).collect();
        let mut evicted = 0;
        for id in ids {
            if self.get(&id).is_none() {
                self.ids.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn id_count(&self) -> usize {
        self.ids.len()
    }
}
