//! Deployment requests

use crate::artifact::ArtifactDescriptor;
use crate::environment::Environment;
use crate::error::ValidationError;
use crate::ids::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An accepted deployment submission. Immutable once built; the execution id
/// is assigned by the orchestrator at acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub execution_id: ExecutionId,
    pub artifact: ArtifactDescriptor,
    pub environment: Environment,
    /// Email of the submitting identity.
    pub requester: String,
    pub created_at: DateTime<Utc>,
    /// Per-request override of the approval window.
    #[serde(default)]
    pub approval_timeout_override_secs: Option<u64>,
}

impl DeploymentRequest {
    pub fn new(
        artifact: ArtifactDescriptor,
        environment: Environment,
        requester: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let requester = requester.into();
        validate_requester(&requester)?;
        Ok(Self {
            execution_id: ExecutionId::generate(),
            artifact,
            environment,
            requester,
            created_at: Utc::now(),
            approval_timeout_override_secs: None,
        })
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout_override_secs = Some(timeout.as_secs());
        self
    }

    pub fn approval_timeout_override(&self) -> Option<Duration> {
        self.approval_timeout_override_secs.map(Duration::from_secs)
    }
}

/// Minimal shape check; real identity comes from the auth collaborator.
fn validate_requester(requester: &str) -> Result<(), ValidationError> {
    let well_formed = requester.len() >= 3
        && requester.contains('@')
        && !requester.starts_with('@')
        && !requester.ends_with('@');
    if !well_formed {
        return Err(ValidationError::InvalidRequester {
            requester: requester.to_string(),
        });
    }
    Ok(())
}
