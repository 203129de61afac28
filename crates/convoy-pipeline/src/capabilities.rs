//! Injected build and test capabilities
//!
//! The pipeline does not build artifacts or run test suites itself; those
//! are collaborator concerns behind these seams. The defaults cover the
//! common case of pre-built, pre-tested artifacts arriving from CI.

use async_trait::async_trait;
use convoy_types::ArtifactDescriptor;
use tokio_util::sync::CancellationToken;

/// Build stage capability. `Ok` carries a human-readable summary, `Err`
/// the failure reason.
#[async_trait]
pub trait BuildCapability: Send + Sync {
    async fn build(
        &self,
        artifact: &ArtifactDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String, String>;
}

/// Artifacts arrive pre-built; the build stage is a recorded no-op.
pub struct PrebuiltArtifacts;

#[async_trait]
impl BuildCapability for PrebuiltArtifacts {
    async fn build(
        &self,
        artifact: &ArtifactDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<String, String> {
        Ok(format!("artifact {artifact} accepted pre-built"))
    }
}

/// Test stage capability.
#[async_trait]
pub trait TestCapability: Send + Sync {
    async fn run_tests(
        &self,
        artifact: &ArtifactDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String, String>;
}

/// Passes without running anything; for fleets whose artifacts are tested
/// upstream.
pub struct NoopTests;

#[async_trait]
impl TestCapability for NoopTests {
    async fn run_tests(
        &self,
        _artifact: &ArtifactDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<String, String> {
        Ok("tests delegated to upstream CI".to_string())
    }
}
