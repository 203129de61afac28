//! Convoy Distributed Locks
//!
//! Named-resource mutual exclusion behind a capability trait. The in-memory
//! manager is correct for single-instance deployments; multi-instance
//! deployments plug a backing store (RDBMS advisory locks, a KV store with
//! compare-and-set and TTL) in behind the same trait.
//!
//! Guarantees:
//!
//! - at most one holder for a given name at a time
//! - automatic release when a holder's TTL lapses
//! - blocking acquisition bounded by a wait timeout, polling no faster than
//!   every 100 ms
//! - release is owner-checked and idempotent

#![deny(unsafe_code)]

pub mod error;
pub mod manager;

pub use error::{LockError, Result};
pub use manager::{InMemoryLockManager, LockGuard, LockManager};
