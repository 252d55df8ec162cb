//! Streamed SHA-256 hashing and integrity reporting

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// A SHA-256 digest as 64 lower-case hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Digest(pub(crate) String);

impl Sha256Digest {
    /// Parse a hex digest, accepting either case
    ///
    /// # Errors
    ///
    /// Returns error if the hex string is invalid or wrong length
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let s = hex.into();
        if s.len() != 64 {
            return Err(Error::configuration(format!(
                "SHA-256 digest must be 64 hex characters, got {}",
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::configuration(
                "SHA-256 digest must contain only hex digits",
            ));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Get the hex representation
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(value)
    }
}

impl From<Sha256Digest> for String {
    fn from(value: Sha256Digest) -> Self {
        value.0
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash everything `reader` yields, `buffer_size` bytes at a time
pub fn sha256_reader<R: Read>(mut reader: R, buffer_size: usize) -> io::Result<Sha256Digest> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(Sha256Digest(hex::encode(hasher.finalize())))
}

/// Hash a file on disk without loading it into memory
pub fn sha256_file(path: &Path, buffer_size: usize) -> Result<Sha256Digest> {
    let file = File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    sha256_reader(file, buffer_size).map_err(|e| Error::io(e, path, "hash"))
}

/// Outcome of the post-promotion content check.
///
/// Never fails a materialization; a mismatch is reported alongside the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// Content digest matched the declared one
    Verified {
        /// The computed digest
        digest: Sha256Digest,
    },
    /// Content digest differs from the declared one
    Mismatch {
        /// Declared digest
        expected: Sha256Digest,
        /// Computed digest
        actual: Sha256Digest,
    },
    /// No comparison was made
    Unchecked,
    /// Hashing itself failed
    Unverifiable {
        /// Why hashing failed
        reason: String,
    },
}

impl IntegrityStatus {
    /// Compare a computed digest against an optional expectation
    #[must_use]
    pub fn compare(expected: Option<&Sha256Digest>, actual: Sha256Digest) -> Self {
        match expected {
            Some(expected) if *expected == actual => Self::Verified { digest: actual },
            Some(expected) => Self::Mismatch {
                expected: expected.clone(),
                actual,
            },
            None => Self::Unchecked,
        }
    }

    /// Whether this is the advisory mismatch signal
    #[must_use]
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }

    /// Short label for logs and text output
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Verified { .. } => "verified",
            Self::Mismatch { .. } => "mismatch",
            Self::Unchecked => "unchecked",
            Self::Unverifiable { .. } => "unverifiable",
        }
    }
}
