//! Command implementations
//!
//! Each command returns an [`Outcome`] and leaves printing to the binary, so
//! the same result can be rendered as text or wrapped in a JSON envelope.

use crate::cli::{Cli, CliError, Commands, MaterializeArgs};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};
use weightcache_cache::digest::sha256_file;
use weightcache_cache::{
    Config, DirBundle, FormatSignature, IntegrityStatus, Materialization, Materializer,
    MemoryBundle, ResourceId, ResourceSpec, Sha256Digest, inspect_header,
};

/// Result of a successful command
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    /// `materialize`
    Materialized(Materialization),
    /// `inspect`
    Inspected(InspectReport),
    /// `invalidate`
    Invalidated(InvalidateReport),
}

impl Outcome {
    /// Plain-text rendering for stdout
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Materialized(m) => m.path.display().to_string(),
            Self::Inspected(report) => report.text(),
            Self::Invalidated(report) => {
                if report.removed {
                    format!("removed {}", report.path.display())
                } else {
                    format!("nothing cached at {}", report.path.display())
                }
            }
        }
    }

    /// Advisory lines for stderr in text mode
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        match self {
            Self::Materialized(m) => match &m.integrity {
                IntegrityStatus::Mismatch { expected, actual } => vec![format!(
                    "warning: SHA-256 mismatch for {}: expected {expected}, got {actual}",
                    m.path.display()
                )],
                IntegrityStatus::Unverifiable { reason } => vec![format!(
                    "warning: could not verify {}: {reason}",
                    m.path.display()
                )],
                IntegrityStatus::Verified { .. } | IntegrityStatus::Unchecked => Vec::new(),
            },
            Self::Inspected(_) | Self::Invalidated(_) => Vec::new(),
        }
    }
}

/// Diagnostic view of a weight file
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    /// Inspected file
    pub path: PathBuf,
    /// File length in bytes
    pub bytes: u64,
    /// Leading bytes as hex
    pub header: String,
    /// Version marker, when the file is long enough
    pub version: Option<String>,
    /// Architecture hash marker, when the file is long enough
    pub hash: Option<String>,
    /// Expected magic prefix as hex
    pub expected_magic: String,
    /// Whether the header carries the expected signature
    pub signature_matches: bool,
    /// Content digest
    pub sha256: Sha256Digest,
    /// Declared resource whose digest equals this file's, if any
    pub known_as: Option<ResourceId>,
}

impl InspectReport {
    fn text(&self) -> String {
        let marker = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
        let signature = if self.signature_matches {
            "ok".to_string()
        } else {
            format!("mismatch (expected {})", self.expected_magic)
        };
        let mut lines = vec![
            format!("path:      {}", self.path.display()),
            format!("size:      {} bytes", self.bytes),
            format!("header:    {}", self.header),
            format!("version:   {}", marker(&self.version)),
            format!("hash:      {}", marker(&self.hash)),
            format!("signature: {signature}"),
            format!("sha256:    {}", self.sha256),
        ];
        if let Some(id) = &self.known_as {
            lines.push(format!("matches:   {id}"));
        }
        lines.join("\n")
    }
}

/// Result of `invalidate`
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateReport {
    /// Resource identifier
    pub id: ResourceId,
    /// Canonical path that was cleared
    pub path: PathBuf,
    /// Whether anything was deleted
    pub removed: bool,
}

/// Run the parsed command line
pub fn run(cli: &Cli) -> Result<Outcome, CliError> {
    let config = load_config(cli.config.as_deref())?;
    match &cli.command {
        Commands::Materialize(args) => materialize(args, config).map(Outcome::Materialized),
        Commands::Inspect { file } => inspect(file, &config).map(Outcome::Inspected),
        Commands::Invalidate { id, cache_dir } => {
            invalidate(id, cache_dir.as_deref(), config).map(Outcome::Invalidated)
        }
    }
}

/// Configuration file contents, or built-in defaults without one
pub fn load_config(path: Option<&Path>) -> Result<Config, CliError> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            Config::load(path).map_err(|e| {
                CliError::config_with_help(
                    format!("Failed to load {}: {e}", path.display()),
                    "Check the file exists and only uses known keys",
                )
            })
        }
        None => Ok(Config::default()),
    }
}

/// Materialize one resource with command-line overrides applied
#[instrument(name = "materialize_command", skip_all, fields(id = %args.id))]
pub fn materialize(args: &MaterializeArgs, mut config: Config) -> Result<Materialization, CliError> {
    let id = ResourceId::new(args.id.clone())?;

    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.bundle_dir {
        config.bundle_dir = Some(dir.clone());
    }
    if let Some(reuse) = args.reuse {
        config.reuse = reuse;
    }
    if args.no_harden {
        config.harden_permissions = false;
    }
    apply_resource_overrides(&mut config, &id, args.min_size, args.sha256.as_deref())?;

    let bundle_dir = config.bundle_dir.clone().ok_or_else(|| {
        CliError::config_with_help(
            "No bundle directory configured",
            "Pass --bundle-dir or set bundle_dir in the configuration file",
        )
    })?;
    let bundle = DirBundle::new(bundle_dir).with_decompression(config.decompress);
    let materializer = Materializer::from_config(&config, Arc::new(bundle))?;

    Ok(materializer.materialize(id.as_str())?)
}

/// Declare or adjust `id` from `--min-size` and `--sha256`.
///
/// An undeclared resource needs an explicit minimum size.
fn apply_resource_overrides(
    config: &mut Config,
    id: &ResourceId,
    min_size: Option<u64>,
    sha256: Option<&str>,
) -> Result<(), CliError> {
    if config.resource(id).is_err() {
        let min_size = min_size.ok_or_else(|| {
            CliError::config_with_help(
                format!("Resource '{id}' is not declared"),
                "Declare it in the configuration file or pass --min-size",
            )
        })?;
        config.resources.push(ResourceSpec::new(id.clone(), min_size));
    }

    let spec = config.resource_mut(id)?;
    if let Some(min_size) = min_size {
        spec.min_size = min_size;
    }
    if let Some(hex) = sha256 {
        spec.sha256 = Some(Sha256Digest::from_hex(hex)?);
    }
    Ok(())
}

/// Describe a weight file on disk
pub fn inspect(path: &Path, config: &Config) -> Result<InspectReport, CliError> {
    let bytes = std::fs::metadata(path)
        .map_err(|e| weightcache_cache::Error::io(e, path, "stat"))?
        .len();
    let header = inspect_header(path)?;
    let sha256 = sha256_file(path, config.buffer_size)?;
    let known_as = config
        .resources
        .iter()
        .find(|spec| spec.sha256.as_ref() == Some(&sha256))
        .map(|spec| spec.id.clone());
    let signature = declared_signature(path, known_as.as_ref(), config);

    Ok(InspectReport {
        path: path.to_path_buf(),
        bytes,
        header: header.hex(),
        version: header.version().map(|v| format!("{v:#010X}")),
        hash: header.hash().map(|h| format!("{h:#010X}")),
        expected_magic: signature.magic_hex(),
        signature_matches: signature.matches(&header),
        sha256,
        known_as,
    })
}

/// Signature of the resource the file belongs to: the one sharing its file
/// name, then the one sharing its digest, else NNUE.
fn declared_signature(
    path: &Path,
    known_as: Option<&ResourceId>,
    config: &Config,
) -> FormatSignature {
    let by_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| config.resources.iter().find(|spec| spec.id.as_str() == name));
    let by_digest = || known_as.and_then(|id| config.resource(id).ok());
    by_name
        .or_else(by_digest)
        .map_or(FormatSignature::NNUE, |spec| spec.signature)
}

/// Remove the cached copy of `id`
pub fn invalidate(
    id: &str,
    cache_dir: Option<&Path>,
    mut config: Config,
) -> Result<InvalidateReport, CliError> {
    if let Some(dir) = cache_dir {
        config.cache_dir = Some(dir.to_path_buf());
    }
    let materializer = Materializer::from_config(&config, Arc::new(MemoryBundle::new()))?;
    let removed = materializer.invalidate(id)?;
    Ok(InvalidateReport {
        id: ResourceId::new(id)?,
        path: materializer.canonical_path(id)?,
        removed,
    })
}
