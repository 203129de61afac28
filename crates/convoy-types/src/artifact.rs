//! Artifact descriptors
//!
//! An artifact is a versioned, signed binary identified by (name, version).
//! Descriptors are immutable after construction; the constructor enforces
//! every validation rule so downstream code never re-checks.

use crate::error::ValidationError;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of metadata entries on a descriptor.
pub const MAX_METADATA_ENTRIES: usize = 50;
/// Maximum length of a metadata key.
pub const MAX_METADATA_KEY_LEN: usize = 100;
/// Maximum length of a metadata value.
pub const MAX_METADATA_VALUE_LEN: usize = 500;

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 64;

/// The (name, version) identity pair of an artifact.
///
/// This is what nodes record as their current/previous artifact; it carries
/// no content so it is cheap to clone around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub version: Version,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A versioned, signed binary artifact.
///
/// Content and detached signature travel together; the signature is a PKCS#7
/// SignedData blob over the SHA-256 of the content. Fields are private so a
/// constructed descriptor cannot be mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    name: String,
    version: Version,
    content: Vec<u8>,
    signature: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

impl ArtifactDescriptor {
    /// Build a descriptor, validating name, content, signature and metadata.
    pub fn new(
        name: impl Into<String>,
        version: Version,
        content: Vec<u8>,
        signature: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_name(&name)?;
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if signature.is_empty() {
            return Err(ValidationError::EmptySignature);
        }
        validate_metadata(&metadata)?;

        Ok(Self {
            name,
            version,
            content,
            signature,
            metadata,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// The identity pair recorded on nodes.
    pub fn artifact_ref(&self) -> ArtifactRef {
        ArtifactRef {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// DNS-label-like: 3..=64 chars, lowercase alphanumeric, interior hyphens.
fn validate_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidArtifactName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(invalid("length must be 3-64 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "only lowercase letters, digits and hyphens are allowed",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must not start or end with a hyphen"));
    }
    Ok(())
}

fn validate_metadata(metadata: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(ValidationError::TooManyMetadataEntries {
            count: metadata.len(),
            max: MAX_METADATA_ENTRIES,
        });
    }
    for (key, value) in metadata {
        if key.len() > MAX_METADATA_KEY_LEN {
            return Err(ValidationError::MetadataKeyTooLong {
                key: key.clone(),
                len: key.len(),
                max: MAX_METADATA_KEY_LEN,
            });
        }
        if value.len() > MAX_METADATA_VALUE_LEN {
            return Err(ValidationError::MetadataValueTooLong {
                key: key.clone(),
                len: value.len(),
                max: MAX_METADATA_VALUE_LEN,
            });
        }
    }
    Ok(())
}
