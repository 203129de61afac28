//! Validation errors for the core data model

use thiserror::Error;

/// Request/descriptor validation failures. Never retried; surfaced to the
/// caller as-is.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("invalid artifact name {name:?}: {reason}")]
    InvalidArtifactName { name: String, reason: String },

    #[error("invalid artifact version {version:?}: {reason}")]
    InvalidArtifactVersion { version: String, reason: String },

    #[error("metadata has {count} entries, maximum is {max}")]
    TooManyMetadataEntries { count: usize, max: usize },

    #[error("metadata key {key:?} is {len} chars, maximum is {max}")]
    MetadataKeyTooLong { key: String, len: usize, max: usize },

    #[error("metadata value for {key:?} is {len} chars, maximum is {max}")]
    MetadataValueTooLong { key: String, len: usize, max: usize },

    #[error("invalid requester address {requester:?}")]
    InvalidRequester { requester: String },

    #[error("artifact content is empty")]
    EmptyContent,

    #[error("artifact signature is empty")]
    EmptySignature,
}
