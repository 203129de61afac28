//! Convoy Orchestration Engine
//!
//! The public entry point: accepts deployment submissions, queues them on
//! a bounded worker pool, serves reads by execution id, and handles
//! rollback requests for running and completed executions.
//!
//! ## Architectural Boundaries
//!
//! - the API collaborator owns: transport, authentication, role checks
//! - `convoy-engine` owns: validation, queueing, worker ownership of
//!   pipelines, per-cluster serialization, sweeper supervision
//! - `convoy-pipeline` owns: what happens inside one execution
//!
//! The submission queue is bounded; overflow is a typed `Backpressure`
//! error, never an unbounded spawn. Shutdown stops intake, drains the
//! queue, then stops the sweepers.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;

pub use engine::{
    DeploymentEngine, EngineCapabilities, ExecutionView, NewDeployment, RollbackAck,
};
pub use error::{EngineError, Result};
