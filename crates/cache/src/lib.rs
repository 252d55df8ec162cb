//! Verified materialization of bundled weight files
//!
//! This crate copies a large, read-only resource shipped inside an
//! application package (a Pikafish NNUE network) into a writable cache
//! directory so that a separate engine process can open it by path.
//!
//! # Overview
//!
//! [`Materializer::ensure_materialized`] runs a single linear pipeline:
//! - Reuse an existing cached copy when the [`ReusePolicy`] allows it
//! - Stream the bundled resource into a staging file with a bounded buffer
//! - Reject copies below the declared minimum size
//! - Reject copies whose header does not carry the expected [`FormatSignature`]
//! - Atomically rename the staging file onto the canonical path
//! - Hash the promoted file and report a digest mismatch without failing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weightcache_cache::{DirBundle, Materializer};
//!
//! let bundle = Arc::new(DirBundle::new("assets"));
//! let materializer = Materializer::new("/tmp/weightcache", bundle);
//! let path = materializer.ensure_materialized("pikafish.nnue")?;
//! # Ok::<(), weightcache_cache::Error>(())
//! ```

pub mod bundle;
pub mod config;
pub mod digest;
mod error;
pub mod format;
pub mod materializer;
pub mod resource;

// Re-export error types at crate root
pub use error::{Error, ErrorKind, Result};

// Re-export main types
pub use bundle::{Bundle, DirBundle, MemoryBundle};
pub use config::{Config, ReusePolicy};
pub use digest::{IntegrityStatus, Sha256Digest};
pub use format::{FormatSignature, Header};
pub use materializer::{Materialization, Materializer, inspect_header};
pub use resource::{ResourceId, ResourceSpec};
