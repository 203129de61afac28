//! Convoy Approval Gate
//!
//! A Pending approval is created when a pipeline wants to promote into a
//! gated environment (Staging, Production). Administrators approve or
//! reject; the sweeper expires overdue records. The pipeline awaits the
//! decision cooperatively: no thread is pinned, and any number of
//! executions can await concurrently.
//!
//! ## Correctness properties
//!
//! - Exactly one decision: Approved/Rejected/Expired are mutually
//!   exclusive and immutable once set.
//! - No lost wakeups: every resolution wakes all waiters registered for
//!   that approval; waiters re-read the store after every wakeup.
//! - Expiration wins: an overdue Pending approval is transitioned to
//!   Expired before any late Approve/Reject could succeed.
//!
//! The store is a capability so the record outlives a process restart when
//! a durable backend is plugged in; approval state is discoverable by
//! execution id either way.

#![deny(unsafe_code)]

pub mod error;
pub mod gate;
pub mod store;
pub mod sweeper;

pub use error::{ApprovalError, Result};
pub use gate::{ApprovalGate, ApprovalKey, ApprovalNotifier, NoopNotifier};
pub use store::{ApprovalStore, InMemoryApprovalStore};
pub use sweeper::ApprovalSweeper;
