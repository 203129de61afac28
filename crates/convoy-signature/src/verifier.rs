//! PKCS#7 signature verification against a configured trust store

use crate::error::{Result, SignatureError};
use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::nid::Nid;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::verify::X509VerifyParam;
use openssl::x509::{X509Ref, X509};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use tracing::debug;

/// How an Invalid verdict is treated by the pipeline. Production always
/// runs Strict; the pipeline enforces that regardless of configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMode {
    /// Invalid aborts the stage.
    Strict,
    /// Invalid is logged and downgraded to a warning.
    Permissive,
}

/// Outcome of verifying one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Verification {
    Valid {
        signer_subject: String,
        algorithm: String,
        /// Hex SHA-256 of the artifact content.
        content_sha256: String,
    },
    Invalid {
        reason: String,
        /// Whether retrying with the same inputs could ever succeed. False
        /// for signature and certificate failures; true only for faults in
        /// the verifier's own machinery.
        recoverable: bool,
    },
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid { .. })
    }
}

/// Artifact signature verifier.
///
/// Holds the parsed trust roots; `verify` has no other state.
pub struct SignatureVerifier {
    trust_roots: Vec<X509>,
    mode: VerificationMode,
}

impl SignatureVerifier {
    /// Build a verifier from DER-encoded CA certificates.
    pub fn new(trust_roots_der: &[Vec<u8>], mode: VerificationMode) -> Result<Self> {
        if trust_roots_der.is_empty() {
            return Err(SignatureError::EmptyTrustStore);
        }
        let mut trust_roots = Vec::with_capacity(trust_roots_der.len());
        for der in trust_roots_der {
            let cert = X509::from_der(der)
                .map_err(|e| SignatureError::MalformedTrustRoot(e.to_string()))?;
            trust_roots.push(cert);
        }
        Ok(Self { trust_roots, mode })
    }

    /// Build a verifier from already-parsed certificates.
    pub fn from_certs(trust_roots: Vec<X509>, mode: VerificationMode) -> Result<Self> {
        if trust_roots.is_empty() {
            return Err(SignatureError::EmptyTrustStore);
        }
        Ok(Self { trust_roots, mode })
    }

    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    /// Verify `signature` (a detached PKCS#7 SignedData blob) over
    /// `content`, evaluating certificate validity at `now`.
    pub fn verify(&self, content: &[u8], signature: &[u8], now: DateTime<Utc>) -> Verification {
        let content_sha256 = hex::encode(Sha256::digest(content));

        let pkcs7 = match Pkcs7::from_der(signature) {
            Ok(p) => p,
            Err(e) => {
                return invalid(format!("signature is not a PKCS#7 SignedData blob: {e}"));
            }
        };

        let empty = match Stack::new() {
            Ok(s) => s,
            Err(e) => return internal(format!("certificate stack allocation failed: {e}")),
        };
        let signers = match pkcs7.signers(&empty, Pkcs7Flags::empty()) {
            Ok(s) => s,
            Err(e) => return invalid(format!("no signer certificate in signature: {e}")),
        };
        let Some(signer) = signers.iter().next() else {
            return invalid("signature carries no signer certificate".to_string());
        };

        // Wall time must fall inside the signer certificate's validity
        // window before any chain work.
        if let Err(reason) = check_validity_window(signer, now) {
            return invalid(reason);
        }

        let store = match self.build_store(now) {
            Ok(s) => s,
            Err(e) => return internal(format!("trust store build failed: {e}")),
        };

        // Chain building, revocation (when the store carries CRLs) and the
        // signature check over the content digest all happen here.
        match pkcs7.verify(&empty, &store, Some(content), None, Pkcs7Flags::BINARY) {
            Ok(()) => {}
            Err(e) => return invalid(format!("signature verification failed: {e}")),
        }

        let signer_subject = subject_string(signer);
        let algorithm = signer
            .signature_algorithm()
            .object()
            .nid()
            .long_name()
            .unwrap_or("unknown")
            .to_string();

        debug!(signer = %signer_subject, algorithm = %algorithm, "artifact signature verified");

        Verification::Valid {
            signer_subject,
            algorithm,
            content_sha256,
        }
    }

    fn build_store(&self, now: DateTime<Utc>) -> std::result::Result<X509Store, String> {
        let mut builder = X509StoreBuilder::new().map_err(|e| e.to_string())?;
        for root in &self.trust_roots {
            builder.add_cert(root.clone()).map_err(|e| e.to_string())?;
        }
        // Pin chain validation to the injected clock so verification stays
        // a pure function of its inputs.
        let mut param = X509VerifyParam::new().map_err(|e| e.to_string())?;
        param.set_time(now.timestamp());
        builder.set_param(&param).map_err(|e| e.to_string())?;
        Ok(builder.build())
    }
}

fn invalid(reason: String) -> Verification {
    Verification::Invalid {
        reason,
        recoverable: false,
    }
}

fn internal(reason: String) -> Verification {
    Verification::Invalid {
        reason,
        recoverable: true,
    }
}

fn check_validity_window(cert: &X509Ref, now: DateTime<Utc>) -> std::result::Result<(), String> {
    let at = Asn1Time::from_unix(now.timestamp())
        .map_err(|e| format!("clock conversion failed: {e}"))?;

    match cert.not_before().compare(&at) {
        Ok(Ordering::Greater) => {
            return Err("signer certificate is not yet valid".to_string());
        }
        Ok(_) => {}
        Err(e) => return Err(format!("certificate validity parse failed: {e}")),
    }
    match cert.not_after().compare(&at) {
        Ok(Ordering::Less) => Err("signer certificate has expired".to_string()),
        Ok(_) => Ok(()),
        Err(e) => Err(format!("certificate validity parse failed: {e}")),
    }
}

fn subject_string(cert: &X509Ref) -> String {
    let parts: Vec<String> = cert
        .subject_name()
        .entries()
        .map(|entry| {
            let key = entry
                .object()
                .nid()
                .short_name()
                .unwrap_or("?")
                .to_string();
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| "?".to_string());
            format!("{key}={value}")
        })
        .collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::x509::extension::BasicConstraints;
    use openssl::x509::{X509NameBuilder, X509};

    fn keypair() -> PKey<Private> {
        let rsa = Rsa::generate(2048).unwrap();
        PKey::from_rsa(rsa).unwrap()
    }

    fn name(cn: &str) -> openssl::x509::X509Name {
        let mut builder = X509NameBuilder::new().unwrap();
        builder.append_entry_by_text("CN", cn).unwrap();
        builder.append_entry_by_text("O", "convoy-tests").unwrap();
        builder.build()
    }

    fn serial() -> openssl::asn1::Asn1Integer {
        let mut bn = BigNum::new().unwrap();
        bn.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
        bn.to_asn1_integer().unwrap()
    }

    fn make_ca() -> (X509, PKey<Private>) {
        let key = keypair();
        let name = name("convoy-test-ca");
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        (builder.build(), key)
    }

    fn make_leaf(ca: &X509, ca_key: &PKey<Private>) -> (X509, PKey<Private>) {
        let key = keypair();
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&name("release-signer")).unwrap();
        builder.set_issuer_name(ca.subject_name()).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.sign(ca_key, MessageDigest::sha256()).unwrap();
        (builder.build(), key)
    }

    fn sign(content: &[u8], leaf: &X509, leaf_key: &PKey<Private>, ca: &X509) -> Vec<u8> {
        let mut extra = Stack::new().unwrap();
        extra.push(ca.clone()).unwrap();
        let pkcs7 = Pkcs7::sign(
            leaf,
            leaf_key,
            &extra,
            content,
            Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY,
        )
        .unwrap();
        pkcs7.to_der().unwrap()
    }

    #[test]
    fn test_valid_signature_verifies() {
        let (ca, ca_key) = make_ca();
        let (leaf, leaf_key) = make_leaf(&ca, &ca_key);
        let content = b"artifact-bytes";
        let signature = sign(content, &leaf, &leaf_key, &ca);

        let verifier =
            SignatureVerifier::from_certs(vec![ca], VerificationMode::Strict).unwrap();
        let verdict = verifier.verify(content, &signature, Utc::now());

        match verdict {
            Verification::Valid {
                signer_subject,
                content_sha256,
                ..
            } => {
                assert!(signer_subject.contains("release-signer"));
                assert_eq!(content_sha256, hex::encode(Sha256::digest(content)));
            }
            Verification::Invalid { reason, .. } => panic!("expected valid, got: {reason}"),
        }
    }

    #[test]
    fn test_tampered_content_is_invalid() {
        let (ca, ca_key) = make_ca();
        let (leaf, leaf_key) = make_leaf(&ca, &ca_key);
        let signature = sign(b"artifact-bytes", &leaf, &leaf_key, &ca);

        let verifier =
            SignatureVerifier::from_certs(vec![ca], VerificationMode::Strict).unwrap();
        let verdict = verifier.verify(b"artifact-bytes-tampered", &signature, Utc::now());
        assert!(!verdict.is_valid());
    }

    #[test]
    fn test_untrusted_ca_is_invalid() {
        let (ca, ca_key) = make_ca();
        let (leaf, leaf_key) = make_leaf(&ca, &ca_key);
        let content = b"artifact-bytes";
        let signature = sign(content, &leaf, &leaf_key, &ca);

        let (other_ca, _) = make_ca();
        let verifier =
            SignatureVerifier::from_certs(vec![other_ca], VerificationMode::Strict).unwrap();
        let verdict = verifier.verify(content, &signature, Utc::now());
        assert!(!verdict.is_valid());
    }

    #[test]
    fn test_expired_certificate_is_invalid() {
        let (ca, ca_key) = make_ca();
        let (leaf, leaf_key) = make_leaf(&ca, &ca_key);
        let content = b"artifact-bytes";
        let signature = sign(content, &leaf, &leaf_key, &ca);

        let verifier =
            SignatureVerifier::from_certs(vec![ca], VerificationMode::Strict).unwrap();
        // Evaluate 10 years out: the leaf's 30-day window has lapsed.
        let future = Utc::now() + chrono::Duration::days(3650);
        let verdict = verifier.verify(content, &signature, future);
        match verdict {
            Verification::Invalid { reason, recoverable } => {
                assert!(reason.contains("expired"), "unexpected reason: {reason}");
                assert!(!recoverable);
            }
            Verification::Valid { .. } => panic!("expected invalid"),
        }
    }

    #[test]
    fn test_garbage_signature_is_invalid() {
        let (ca, _) = make_ca();
        let verifier =
            SignatureVerifier::from_certs(vec![ca], VerificationMode::Strict).unwrap();
        let verdict = verifier.verify(b"content", b"not-a-pkcs7-blob", Utc::now());
        assert!(!verdict.is_valid());
    }

    #[test]
    fn test_verification_is_deterministic() {
        let (ca, ca_key) = make_ca();
        let (leaf, leaf_key) = make_leaf(&ca, &ca_key);
        let content = b"artifact-bytes";
        let signature = sign(content, &leaf, &leaf_key, &ca);
        let verifier =
            SignatureVerifier::from_certs(vec![ca], VerificationMode::Strict).unwrap();

        let at = Utc::now();
        let first = verifier.verify(content, &signature, at);
        let second = verifier.verify(content, &signature, at);
        assert_eq!(first.is_valid(), second.is_valid());
        assert!(first.is_valid());
    }

    #[test]
    fn test_empty_trust_store_rejected() {
        let result = SignatureVerifier::from_certs(Vec::new(), VerificationMode::Strict);
        assert!(matches!(result, Err(SignatureError::EmptyTrustStore)));
    }
}
