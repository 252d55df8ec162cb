use crate::tracing::{LogLevel, TracingFormat};
use clap::{Parser, Subcommand};
use miette::{Diagnostic, Report};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;
use weightcache_cache::{ErrorKind, ReusePolicy};

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// Materialization failure exit code
pub const EXIT_MATERIALIZE: i32 = 3;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// CLI or configuration error (exit code 2)
    #[error("CLI/configuration error: {message}")]
    #[diagnostic(code(weightcache::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The resource could not be materialized (exit code 3)
    #[error("{message}")]
    #[diagnostic(code(weightcache::cli::materialize))]
    Materialize {
        /// Machine-readable failure kind
        kind: ErrorKind,
        /// The error message
        message: String,
        /// Underlying causes, outermost first
        trace: Vec<String>,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Other unexpected error (exit code 3)
    #[error("Unexpected error: {message}")]
    #[diagnostic(code(weightcache::cli::other))]
    Other {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new other error
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            help: None,
        }
    }

    /// Machine-readable code for JSON output
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => ErrorKind::Configuration.as_str(),
            Self::Materialize { kind, .. } => kind.as_str(),
            Self::Other { .. } => "other",
        }
    }

    /// Underlying causes, outermost first
    #[must_use]
    pub fn trace(&self) -> &[String] {
        match self {
            Self::Materialize { trace, .. } => trace,
            Self::Config { .. } | Self::Other { .. } => &[],
        }
    }
}

/// Convert `weightcache_cache::Error` to the appropriate `CliError` variant.
///
/// Configuration errors exit with code 2, everything else with code 3.
impl From<weightcache_cache::Error> for CliError {
    fn from(err: weightcache_cache::Error) -> Self {
        let help = err.help().map(|h| h.to_string());
        match err {
            weightcache_cache::Error::Configuration { message } => Self::Config { message, help },
            other => {
                let mut trace = Vec::new();
                let mut source = std::error::Error::source(&other);
                while let Some(cause) = source {
                    trace.push(cause.to_string());
                    source = cause.source();
                }
                Self::Materialize {
                    kind: other.kind(),
                    message: other.to_string(),
                    trace,
                    help,
                }
            }
        }
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Materialize { .. } | CliError::Other { .. } => EXIT_MATERIALIZE,
    }
}

/// JSON body of a failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable failure kind
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Underlying causes, absent when there are none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl From<&CliError> for ErrorBody {
    fn from(err: &CliError) -> Self {
        let trace = err.trace();
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            trace: (!trace.is_empty()).then(|| trace.join("\n")),
        }
    }
}

/// Render error appropriately based on JSON flag
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn render_error(err: &CliError, json_mode: bool) {
    if json_mode {
        let envelope = ErrorEnvelope::new(ErrorBody::from(err));
        match serde_json::to_string(&envelope) {
            Ok(json) => println!("{json}"),
            Err(_) => eprintln!("Error serializing error response"),
        }
    } else {
        let report = Report::new(err.clone());
        eprintln!("{report:?}");
        let _ = io::stderr().flush();
    }
}

/// Success response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkEnvelope<T> {
    /// Status indicator - always "ok" for success
    pub status: &'static str,
    /// The actual data payload
    pub data: T,
}

impl<T> OkEnvelope<T> {
    /// Create a new success envelope
    #[must_use]
    pub const fn new(data: T) -> Self {
        Self { status: "ok", data }
    }
}

/// Error response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope<E> {
    /// Status indicator - always "error" for failures
    pub status: &'static str,
    /// The error details
    pub error: E,
}

impl<E> ErrorEnvelope<E> {
    /// Create a new error envelope
    #[must_use]
    pub const fn new(error: E) -> Self {
        Self {
            status: "error",
            error,
        }
    }
}

/// Materialize bundled weight files into a verified local cache.
#[derive(Parser, Debug)]
#[command(name = "weightcache")]
#[command(about = "Materialize bundled weight files into a verified local cache")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file.
    #[arg(long, global = true, env = "WEIGHTCACHE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long = "log-level",
        global = true,
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(long = "log-format", global = true, default_value = "compact", value_enum)]
    pub log_format: TracingFormat,

    /// Emit a JSON envelope on stdout.
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy a bundled resource into the cache and print its path.
    Materialize(MaterializeArgs),
    /// Show size, header and digest of a weight file.
    Inspect {
        /// File to inspect.
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Remove a cached resource and any staging leftover.
    Invalidate {
        /// Resource identifier.
        #[arg(value_name = "ID")]
        id: String,
        /// Cache directory.
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },
}

/// Arguments of `weightcache materialize`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct MaterializeArgs {
    /// Resource identifier.
    #[arg(value_name = "ID")]
    pub id: String,
    /// Directory holding bundled resources.
    #[arg(long, value_name = "DIR")]
    pub bundle_dir: Option<PathBuf>,
    /// Cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
    /// When an existing cached copy may be reused (size-only, revalidate, never).
    #[arg(long, value_name = "POLICY")]
    pub reuse: Option<ReusePolicy>,
    /// Minimum acceptable size in bytes.
    #[arg(long, value_name = "BYTES")]
    pub min_size: Option<u64>,
    /// Expected SHA-256 digest (hex).
    #[arg(long, value_name = "HEX")]
    pub sha256: Option<String>,
    /// Leave the promoted file writable.
    #[arg(long)]
    pub no_harden: bool,
}

/// Parse command-line arguments, exiting on usage errors
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
