//! weightcache command-line front end
//!
//! Thin layer over [`weightcache_cache`]: argument parsing, configuration
//! loading, tracing setup and output rendering. All file handling lives in
//! the library crate.

/// CLI argument parsing, error rendering and exit codes.
pub mod cli;
/// Command implementations.
pub mod commands;
/// Tracing subscriber setup.
pub mod tracing;
