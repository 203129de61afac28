//! Convoy Core Types
//!
//! Shared data model for the Convoy orchestration engine: artifact
//! descriptors, environments and their rollout policies, the node/cluster
//! health model, pipeline execution state, approval records, configuration
//! knobs, and the event envelope.
//!
//! ## Architectural Boundaries
//!
//! - `convoy-types` owns: the data model and its validation rules
//! - capability crates (`convoy-registry`, `convoy-approval`, ...) own:
//!   behavior and storage for those types
//! - `convoy-engine` owns: wiring and the public orchestration surface
//!
//! Types here carry no I/O. Everything is `serde`-serializable so stores and
//! collaborators can persist or ship them without adapters.

#![deny(unsafe_code)]

pub mod approval;
pub mod artifact;
pub mod config;
pub mod environment;
pub mod error;
pub mod event;
pub mod execution;
pub mod ids;
pub mod node;
pub mod request;

// Re-exports
pub use approval::{ApprovalRequest, ApprovalStatus};
pub use artifact::{ArtifactDescriptor, ArtifactRef};
pub use config::{
    ApprovalConfig, BlueGreenConfig, CanaryConfig, ConvoyConfig, DegradationPolicy, EngineConfig,
    HeartbeatConfig, MetricsConfig, NodeHealthConfig, RollingConfig, SecurityConfig, StageTimeouts,
    StrategyConfig, TrackerConfig,
};
pub use environment::{Environment, StrategyKind};
pub use error::ValidationError;
pub use event::{ConvoyEvent, ConvoyEventEnvelope};
pub use execution::{
    ExecutionStatus, PipelineExecution, PipelineStage, StageRecord, StageStatus,
};
pub use ids::{ApprovalId, ExecutionId, NodeId, TraceId};
pub use node::{
    ClusterHealth, ClusterStatus, HealthCounters, Node, NodeHealth, TrafficPool,
};
pub use request::DeploymentRequest;
