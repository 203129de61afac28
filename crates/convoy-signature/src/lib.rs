//! Convoy Signature Verifier
//!
//! Validates an artifact before any node-level action: SHA-256 content
//! digest, PKCS#7 `SignedData` parse, signer certificate validity window,
//! chain building against the configured trust store, and signature
//! verification over the content.
//!
//! Verification is a pure function of `(content, signature, trust store,
//! now)`: the clock is injected, so the same inputs always produce the
//! same verdict. Invalid results are never retried; a bad signature does
//! not become good.

#![deny(unsafe_code)]

pub mod error;
pub mod verifier;

pub use error::{SignatureError, Result};
pub use verifier::{SignatureVerifier, Verification, VerificationMode};
