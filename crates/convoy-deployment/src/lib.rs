//! Convoy Rollout Strategies
//!
//! Encapsulates how artifacts flow to a cluster and when to abort. All four
//! strategies satisfy one contract: deploy an artifact to the node set read
//! at start, honor cancellation promptly, bound per-node fan-out, and
//! restore the prior artifact when things go wrong.
//!
//! ## Architectural Boundaries
//!
//! - `convoy-registry` owns: the actual node apply/rollback operations
//! - `convoy-deployment` owns: ordering, batching, waves, health waits,
//!   soak evaluation and rollback choreography
//! - `convoy-pipeline` owns: when a strategy runs and what happens to its
//!   result
//!
//! A strategy that rolls the cluster back itself reports `RolledBack`; the
//! pipeline re-invokes `rollback` only as a backstop when the deploy call
//! errored outright.

#![deny(unsafe_code)]

pub mod context;
pub mod error;
pub mod executor;
pub mod strategies;

pub use context::{AlwaysPassSmoke, RolloutContext, SmokeCheck};
pub use error::{DeploymentError, Result};
pub use executor::{NodeAction, NodeOutcome, RolloutResult, RolloutStatus, RolloutStrategy};
pub use strategies::create_strategy;
