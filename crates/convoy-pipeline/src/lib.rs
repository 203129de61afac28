//! Convoy Deployment Pipeline
//!
//! The fixed stage machine every accepted submission runs through:
//!
//! Build → Test → SecurityScan → Deploy → Validate
//!
//! A stage starts only when its predecessor succeeded. Failures mark the
//! remaining stages Skipped, trigger rollback when the deploy stage had
//! partial side effects, and close the execution out through the tracker's
//! single atomic operation. Staging and Production wait on a human
//! approval before the deploy stage; a Rejected or Expired approval fails
//! the pipeline without touching a node.

#![deny(unsafe_code)]

pub mod board;
pub mod capabilities;
pub mod pipeline;

pub use board::ExecutionBoard;
pub use capabilities::{BuildCapability, NoopTests, PrebuiltArtifacts, TestCapability};
pub use pipeline::Pipeline;
