//! Resource identifiers and declarations

use crate::digest::Sha256Digest;
use crate::format::FormatSignature;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Suffix appended to a resource identifier to name its staging file
pub const STAGING_SUFFIX: &str = ".tmp";

/// Bundled Pikafish network shipped with the application
pub const PIKAFISH_NNUE: &str = "pikafish.nnue";

/// Minimum plausible size of the bundled network (50 MiB)
pub const PIKAFISH_MIN_SIZE: u64 = 50 * 1024 * 1024;

/// SHA-256 of the raw (decompressed) bundled network
pub const PIKAFISH_SHA256: &str =
    "ec1649d0f32d000f22f6ee8f7e339ff27c2e967ea1ff5580603bb6bb686bbd56";

/// A bundled resource name, usable as a flat filename in the cache directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Validate a resource identifier
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is empty, a relative path
    /// component, contains a separator, or collides with staging names.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::configuration("Resource identifier must not be empty"));
        }
        if id == "." || id == ".." {
            return Err(Error::configuration(format!(
                "Resource identifier '{id}' is not a filename"
            )));
        }
        if id.contains(['/', '\\', '\0']) {
            return Err(Error::configuration(format!(
                "Resource identifier '{id}' must not contain path separators"
            )));
        }
        if id.ends_with(STAGING_SUFFIX) {
            return Err(Error::configuration(format!(
                "Resource identifier '{id}' must not end with '{STAGING_SUFFIX}'"
            )));
        }
        Ok(Self(id))
    }

    /// The identifier as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename of the staging file for this resource
    #[must_use]
    pub fn staging_name(&self) -> String {
        format!("{}{STAGING_SUFFIX}", self.0)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ResourceId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.0
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validation settings declared for one bundled resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    /// Resource identifier (bundle name and cache filename)
    pub id: ResourceId,
    /// Minimum byte length of a plausible copy
    pub min_size: u64,
    /// Expected content digest, checked after promotion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Sha256Digest>,
    /// Expected header markers
    #[serde(default)]
    pub signature: FormatSignature,
}

impl ResourceSpec {
    /// Declare a resource with the NNUE signature and no expected digest
    #[must_use]
    pub fn new(id: ResourceId, min_size: u64) -> Self {
        Self {
            id,
            min_size,
            sha256: None,
            signature: FormatSignature::NNUE,
        }
    }

    /// Set the expected content digest
    #[must_use]
    pub fn with_sha256(mut self, digest: Sha256Digest) -> Self {
        self.sha256 = Some(digest);
        self
    }

    /// Set the expected header markers
    #[must_use]
    pub fn with_signature(mut self, signature: FormatSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Declaration for the bundled Pikafish network
    #[must_use]
    pub fn pikafish() -> Self {
        Self {
            id: ResourceId(PIKAFISH_NNUE.to_string()),
            min_size: PIKAFISH_MIN_SIZE,
            sha256: Some(Sha256Digest(PIKAFISH_SHA256.to_string())),
            signature: FormatSignature::NNUE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_filenames() {
        let id = ResourceId::new("pikafish.nnue").unwrap();
        assert_eq!(id.as_str(), "pikafish.nnue");
        assert_eq!(id.staging_name(), "pikafish.nnue.tmp");
    }

    #[test]
    fn rejects_paths_and_reserved_names() {
        for bad in ["", ".", "..", "a/b", "..\\x", "nul\0", "pikafish.nnue.tmp"] {
            assert!(ResourceId::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn pikafish_declaration() {
        let spec = ResourceSpec::pikafish();
        assert_eq!(spec.id.as_str(), PIKAFISH_NNUE);
        assert_eq!(spec.min_size, 50 * 1024 * 1024);
        assert_eq!(spec.sha256.unwrap().as_hex(), PIKAFISH_SHA256);
        assert!(Sha256Digest::from_hex(PIKAFISH_SHA256).is_ok());
        assert_eq!(spec.signature, FormatSignature::NNUE);
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: ResourceSpec =
            toml::from_str("id = \"net.nnue\"\nmin_size = 1024").unwrap();
        assert_eq!(spec.id.as_str(), "net.nnue");
        assert!(spec.sha256.is_none());
        assert_eq!(spec.signature, FormatSignature::NNUE);
    }

    #[test]
    fn spec_rejects_invalid_id() {
        let res: std::result::Result<ResourceSpec, _> =
            toml::from_str("id = \"../net\"\nmin_size = 1");
        assert!(res.is_err());
    }
}
