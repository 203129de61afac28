//! Verifier construction errors
//!
//! Verification itself never errors; it returns `Verification::Invalid`.
//! These errors cover building the verifier from a trust store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("trust store is empty")]
    EmptyTrustStore,

    #[error("trust store certificate could not be parsed: {0}")]
    MalformedTrustRoot(String),
}

/// Result type for verifier construction
pub type Result<T> = std::result::Result<T, SignatureError>;
