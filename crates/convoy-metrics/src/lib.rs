//! Convoy Metrics Provider
//!
//! Two kinds of reads over fleet health counters: cached snapshots (a short
//! per-node TTL bounds read load) and fresh snapshots captured immediately
//! before or after an operation. The degradation comparison used by the
//! Canary strategy is a pure function over two snapshots and an injected
//! policy.

#![deny(unsafe_code)]

pub mod compare;
pub mod error;
pub mod provider;
pub mod snapshot;

pub use compare::is_degraded;
pub use error::{MetricsError, Result};
pub use provider::{CachingMetricsProvider, CounterSource, MetricsProvider};
pub use snapshot::{MetricsSnapshot, NodeSample};
