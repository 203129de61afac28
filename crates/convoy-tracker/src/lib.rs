//! Convoy Deployment Tracker
//!
//! Two TTL-bounded stores keyed by execution id: *in-progress* holds the
//! accepted request while its pipeline runs, *results* holds the terminal
//! pipeline state. Companion id-sets make listing cheap; stale ids are
//! dropped lazily as lists walk them and by the eviction sweeper.
//!
//! Closing out an execution is a single atomic operation,
//! [`DeploymentTracker::store_result_and_clear_in_progress`], so no reader
//! can ever observe an execution in both stores or in neither.

#![deny(unsafe_code)]

pub mod cache;
pub mod error;
pub mod sweeper;
pub mod tracker;

pub use cache::TtlStore;
pub use error::{Result, TrackerError};
pub use sweeper::TrackerSweeper;
pub use tracker::{DeploymentTracker, Page};
