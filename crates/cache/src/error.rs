//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for materialization operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The staged copy is shorter than the declared minimum size
    #[error("Resource '{resource}' is too small: {actual} bytes, expected >= {minimum}")]
    #[diagnostic(
        code(weightcache::too_small),
        help("The bundled resource was truncated or is not the expected file")
    )]
    TooSmall {
        /// Resource identifier
        resource: String,
        /// Bytes actually copied
        actual: u64,
        /// Declared minimum size
        minimum: u64,
    },

    /// The staged copy does not start with the expected format signature
    #[error("Resource '{resource}' has an invalid header: {found}, expected {expected}")]
    #[diagnostic(
        code(weightcache::invalid_header),
        help("The bundled resource is corrupted or a different format version")
    )]
    InvalidHeader {
        /// Resource identifier
        resource: String,
        /// Observed header bytes as hex
        found: String,
        /// Expected magic prefix as hex
        expected: String,
    },

    /// The staging file could not be renamed into place
    #[error("Failed to promote {} to {}: {message}", from.display(), to.display())]
    #[diagnostic(
        code(weightcache::promotion_failed),
        help("Another process may be writing the cache directory; retry the operation")
    )]
    PromotionFailed {
        /// Staging path
        from: Box<Path>,
        /// Canonical path
        to: Box<Path>,
        /// What went wrong
        message: String,
        /// Underlying I/O error, when there is one
        #[source]
        source: Option<std::io::Error>,
    },

    /// I/O error during materialization
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(weightcache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(weightcache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`Error::TooSmall`]
    TooSmall,
    /// See [`Error::InvalidHeader`]
    InvalidHeader,
    /// See [`Error::PromotionFailed`]
    PromotionFailed,
    /// See [`Error::Io`]
    IoFailure,
    /// See [`Error::Configuration`]
    Configuration,
}

impl ErrorKind {
    /// Stable string form of the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TooSmall => "too_small",
            Self::InvalidHeader => "invalid_header",
            Self::PromotionFailed => "promotion_failed",
            Self::IoFailure => "io_failure",
            Self::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TooSmall { .. } => ErrorKind::TooSmall,
            Self::InvalidHeader { .. } => ErrorKind::InvalidHeader,
            Self::PromotionFailed { .. } => ErrorKind::PromotionFailed,
            Self::Io { .. } => ErrorKind::IoFailure,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a too-small error
    #[must_use]
    pub fn too_small(resource: impl Into<String>, actual: u64, minimum: u64) -> Self {
        Self::TooSmall {
            resource: resource.into(),
            actual,
            minimum,
        }
    }

    /// Create an invalid-header error
    #[must_use]
    pub fn invalid_header(
        resource: impl Into<String>,
        found: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidHeader {
            resource: resource.into(),
            found: found.into(),
            expected: expected.into(),
        }
    }

    /// Create a promotion error
    #[must_use]
    pub fn promotion_failed(
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        message: impl Into<String>,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::PromotionFailed {
            from: from.as_ref().into(),
            to: to.as_ref().into(),
            message: message.into(),
            source,
        }
    }
}

/// Result type for materialization operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn kinds_are_stable_strings() {
        assert_eq!(Error::too_small("a", 1, 2).kind().as_str(), "too_small");
        assert_eq!(
            Error::invalid_header("a", "00", "20").kind().as_str(),
            "invalid_header"
        );
        assert_eq!(
            Error::promotion_failed("/a.tmp", "/a", "rename failed", None)
                .kind()
                .as_str(),
            "promotion_failed"
        );
        assert_eq!(
            Error::io_no_path(std::io::Error::other("boom"), "read")
                .kind()
                .as_str(),
            "io_failure"
        );
        assert_eq!(
            Error::configuration("bad").kind().to_string(),
            "configuration"
        );
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PromotionFailed).unwrap();
        assert_eq!(json, "\"promotion_failed\"");
    }

    #[test]
    fn io_error_display_includes_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            "/cache/pikafish.nnue",
            "open",
        );
        let display = err.to_string();
        assert!(display.contains("open"));
        assert!(display.contains("/cache/pikafish.nnue"));
        assert!(err.source().is_some());
    }

    #[test]
    fn too_small_display_mentions_sizes() {
        let err = Error::too_small("pikafish.nnue", 10, 50);
        let display = err.to_string();
        assert!(display.contains("10 bytes"));
        assert!(display.contains(">= 50"));
    }

    #[test]
    fn promotion_failed_keeps_source() {
        let err = Error::promotion_failed(
            "/c/x.tmp",
            "/c/x",
            "rename failed",
            Some(std::io::Error::other("busy")),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/c/x.tmp"));
    }
}
