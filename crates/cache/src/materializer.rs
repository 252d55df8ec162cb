//! Copy-validate-promote pipeline for bundled resources
//!
//! ## On-disk layout
//!
//! ```text
//! <cache_dir>/
//!   pikafish.nnue      (canonical, consumer-visible)
//!   pikafish.nnue.tmp  (staging, owned by one in-flight attempt)
//! ```
//!
//! A file at the canonical name is only ever produced by renaming a staging
//! file that already passed the size and header checks, so readers opening it
//! by path never observe a partial copy.

use crate::bundle::Bundle;
use crate::config::{Config, DEFAULT_BUFFER_SIZE, ReusePolicy};
use crate::digest::{IntegrityStatus, sha256_file};
use crate::format::{Header, read_header};
use crate::resource::{ResourceId, ResourceSpec};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one materialization call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Materialization {
    /// Canonical path of the materialized file
    pub path: PathBuf,
    /// File length in bytes
    pub bytes: u64,
    /// Whether an existing cached copy was handed out
    pub reused: bool,
    /// Post-promotion content check outcome
    pub integrity: IntegrityStatus,
    /// Wall time spent in the call
    #[serde(with = "duration_ms", rename = "elapsed_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Materializes declared bundled resources into a flat cache directory
#[derive(Debug, Clone)]
pub struct Materializer {
    cache_dir: PathBuf,
    bundle: Arc<dyn Bundle>,
    resources: BTreeMap<ResourceId, ResourceSpec>,
    buffer_size: usize,
    reuse: ReusePolicy,
    harden_permissions: bool,
}

impl Materializer {
    /// Create a materializer with the default resource table
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, bundle: Arc<dyn Bundle>) -> Self {
        let spec = ResourceSpec::pikafish();
        Self {
            cache_dir: cache_dir.into(),
            bundle,
            resources: BTreeMap::from([(spec.id.clone(), spec)]),
            buffer_size: DEFAULT_BUFFER_SIZE,
            reuse: ReusePolicy::default(),
            harden_permissions: true,
        }
    }

    /// Build a materializer from validated configuration
    pub fn from_config(config: &Config, bundle: Arc<dyn Bundle>) -> Result<Self> {
        config.validate()?;
        let cache_dir = config.resolve_cache_dir()?;
        Ok(Self {
            cache_dir,
            bundle,
            resources: config
                .resources
                .iter()
                .map(|spec| (spec.id.clone(), spec.clone()))
                .collect(),
            buffer_size: config.buffer_size,
            reuse: config.reuse,
            harden_permissions: config.harden_permissions,
        })
    }

    /// Declare (or redeclare) a resource
    #[must_use]
    pub fn with_resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.insert(spec.id.clone(), spec);
        self
    }

    /// Set the default reuse policy
    #[must_use]
    pub fn with_reuse_policy(mut self, reuse: ReusePolicy) -> Self {
        self.reuse = reuse;
        self
    }

    /// Set the copy and hash buffer size (clamped to at least one byte)
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Enable or disable read-only permissions on promoted files
    #[must_use]
    pub fn with_permission_hardening(mut self, enabled: bool) -> Self {
        self.harden_permissions = enabled;
        self
    }

    /// Cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Default reuse policy
    #[must_use]
    pub const fn reuse_policy(&self) -> ReusePolicy {
        self.reuse
    }

    /// Declaration of a resource
    pub fn resource(&self, id: &str) -> Result<&ResourceSpec> {
        let id = ResourceId::new(id)?;
        self.resources
            .get(&id)
            .ok_or_else(|| Error::configuration(format!("Resource '{id}' is not declared")))
    }

    /// Canonical, consumer-visible path of a resource
    pub fn canonical_path(&self, id: &str) -> Result<PathBuf> {
        let id = ResourceId::new(id)?;
        Ok(self.cache_dir.join(id.as_str()))
    }

    /// Staging path of a resource
    pub fn staging_path(&self, id: &str) -> Result<PathBuf> {
        let id = ResourceId::new(id)?;
        Ok(self.cache_dir.join(id.staging_name()))
    }

    /// Make sure a verified copy of `id` exists and return its path
    pub fn ensure_materialized(&self, id: &str) -> Result<PathBuf> {
        self.materialize(id).map(|m| m.path)
    }

    /// Materialize `id` under the default reuse policy
    pub fn materialize(&self, id: &str) -> Result<Materialization> {
        self.materialize_with(id, self.reuse)
    }

    /// Materialize `id` under an explicit reuse policy
    #[tracing::instrument(name = "materialize", skip(self), fields(cache_dir = %self.cache_dir.display()))]
    pub fn materialize_with(&self, id: &str, reuse: ReusePolicy) -> Result<Materialization> {
        let started = Instant::now();
        let spec = self.resource(id)?;
        let canonical = self.canonical_dir()?.join(spec.id.as_str());

        if let Some(mut reused) = self.check_existing(spec, &canonical, reuse)? {
            reused.elapsed = started.elapsed();
            return Ok(reused);
        }

        let staging = self.cache_dir.join(spec.id.staging_name());
        remove_if_exists(&staging)?;

        let (mut staged, bytes) = self.stage(spec, &staging)?;

        if bytes < spec.min_size {
            drop(staged);
            discard(&staging);
            return Err(Error::too_small(spec.id.as_str(), bytes, spec.min_size));
        }

        let header = staged
            .seek(SeekFrom::Start(0))
            .and_then(|_| read_header(&mut staged))
            .map_err(|e| Error::io(e, &staging, "read header"))?;
        debug!(resource = %spec.id, header = %header.hex(), "Staged header");
        if !spec.signature.matches(&header) {
            drop(staged);
            discard(&staging);
            return Err(Error::invalid_header(
                spec.id.as_str(),
                header.hex(),
                spec.signature.magic_hex(),
            ));
        }

        self.promote(&staged, &staging, &canonical)?;
        drop(staged);
        info!(resource = %spec.id, path = %canonical.display(), bytes, "Promoted resource");

        let integrity = self.verify_content(spec, &canonical);
        if self.harden_permissions {
            harden(&canonical);
        }

        Ok(Materialization {
            path: canonical,
            bytes,
            reused: false,
            integrity,
            elapsed: started.elapsed(),
        })
    }

    /// Delete the cached copy and any staging leftover.
    ///
    /// Returns whether anything was removed.
    pub fn invalidate(&self, id: &str) -> Result<bool> {
        let id = ResourceId::new(id)?;
        let canonical = self.cache_dir.join(id.as_str());
        let staging = self.cache_dir.join(id.staging_name());
        let removed_canonical = remove_if_exists(&canonical)?;
        let removed_staging = remove_if_exists(&staging)?;
        if removed_canonical || removed_staging {
            info!(resource = %id, "Invalidated cached resource");
        }
        Ok(removed_canonical || removed_staging)
    }

    /// Absolute cache directory, created on demand
    fn canonical_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| Error::io(e, &self.cache_dir, "create_dir_all"))?;
        std::path::absolute(&self.cache_dir).map_err(|e| Error::io(e, &self.cache_dir, "absolute"))
    }

    /// Reuse check against an existing canonical file.
    ///
    /// An existing file that fails the check is deleted so that a failed call
    /// never leaves an invalid canonical file behind.
    fn check_existing(
        &self,
        spec: &ResourceSpec,
        canonical: &Path,
        reuse: ReusePolicy,
    ) -> Result<Option<Materialization>> {
        let metadata = match fs::symlink_metadata(canonical) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(resource = %spec.id, "Cache miss");
                return Ok(None);
            }
            Err(e) => return Err(Error::io(e, canonical, "metadata")),
        };

        let plausible = metadata.is_file() && metadata.len() >= spec.min_size;
        let reusable = match reuse {
            ReusePolicy::Never => None,
            ReusePolicy::SizeOnly if plausible => Some(IntegrityStatus::Unchecked),
            ReusePolicy::Revalidate if plausible => self.revalidate(spec, canonical),
            ReusePolicy::SizeOnly | ReusePolicy::Revalidate => {
                debug!(
                    resource = %spec.id,
                    bytes = metadata.len(),
                    min_size = spec.min_size,
                    "Cached copy is not plausible"
                );
                None
            }
        };

        if let Some(integrity) = reusable {
            debug!(resource = %spec.id, path = %canonical.display(), "Cache hit");
            return Ok(Some(Materialization {
                path: canonical.to_path_buf(),
                bytes: metadata.len(),
                reused: true,
                integrity,
                elapsed: Duration::ZERO,
            }));
        }

        if metadata.is_dir() {
            return Err(Error::promotion_failed(
                self.cache_dir.join(spec.id.staging_name()),
                canonical,
                "canonical path is a directory",
                None,
            ));
        }
        // Under `Never` the previous copy stays until the rename replaces it.
        if reuse != ReusePolicy::Never {
            remove_if_exists(canonical)?;
            debug!(resource = %spec.id, "Removed stale cached copy");
        }
        Ok(None)
    }

    /// Full re-check of a cached file: header and, if declared, digest
    fn revalidate(&self, spec: &ResourceSpec, canonical: &Path) -> Option<IntegrityStatus> {
        let header = match File::open(canonical).and_then(read_header) {
            Ok(header) => header,
            Err(e) => {
                warn!(resource = %spec.id, error = %e, "Cannot read cached header");
                return None;
            }
        };
        if !spec.signature.matches(&header) {
            warn!(resource = %spec.id, header = %header.hex(), "Cached copy has an invalid header");
            return None;
        }
        if spec.sha256.is_none() {
            return Some(IntegrityStatus::Unchecked);
        }
        match self.verify_content(spec, canonical) {
            IntegrityStatus::Mismatch { .. } | IntegrityStatus::Unverifiable { .. } => None,
            status => Some(status),
        }
    }

    /// Stream the bundled resource into a fresh staging file
    fn stage(&self, spec: &ResourceSpec, staging: &Path) -> Result<(File, u64)> {
        let started = Instant::now();
        let source = self
            .bundle
            .open(&spec.id)
            .map_err(|e| Error::io(e, Path::new(spec.id.as_str()), "open bundled resource"))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(staging)
            .map_err(|e| Error::io(e, staging, "create"))?;

        let mut reader = BufReader::with_capacity(self.buffer_size, source);
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let copied = io::copy(&mut reader, &mut writer);
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(writer);
                discard(staging);
                return Err(Error::io(e, staging, "copy"));
            }
        };
        let file = match writer.into_inner() {
            Ok(file) => file,
            Err(e) => {
                discard(staging);
                return Err(Error::io(e.into_error(), staging, "flush"));
            }
        };
        file.sync_all()
            .map_err(|e| Error::io(e, staging, "sync"))?;

        info!(
            resource = %spec.id,
            bytes,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Copied bundled resource to staging"
        );
        Ok((file, bytes))
    }

    /// Atomically rename the staging file onto the canonical path
    fn promote(&self, staged: &File, staging: &Path, canonical: &Path) -> Result<()> {
        let ours = staged
            .metadata()
            .map_err(|e| Error::io(e, staging, "metadata"))?;
        match fs::metadata(staging) {
            Ok(current) if same_file(&ours, &current) => {}
            Ok(_) => {
                return Err(Error::promotion_failed(
                    staging,
                    canonical,
                    "staging file was replaced by a concurrent attempt",
                    None,
                ));
            }
            Err(e) => {
                return Err(Error::promotion_failed(
                    staging,
                    canonical,
                    "staging file disappeared before promotion",
                    Some(e),
                ));
            }
        }

        #[cfg(not(unix))]
        if let Err(e) = remove_if_exists(canonical) {
            return Err(Error::promotion_failed(
                staging,
                canonical,
                format!("cannot remove previous copy: {e}"),
                None,
            ));
        }

        fs::rename(staging, canonical).map_err(|e| {
            Error::promotion_failed(staging, canonical, "rename failed", Some(e))
        })?;
        confirm_promoted(&ours, staging, canonical)?;
        sync_dir(&self.cache_dir);
        Ok(())
    }

    /// Advisory full-content check; never fails the call
    fn verify_content(&self, spec: &ResourceSpec, path: &Path) -> IntegrityStatus {
        let Some(expected) = spec.sha256.as_ref() else {
            return IntegrityStatus::Unchecked;
        };
        match sha256_file(path, self.buffer_size) {
            Ok(actual) => {
                let status = IntegrityStatus::compare(Some(expected), actual);
                match &status {
                    IntegrityStatus::Mismatch { expected, actual } => warn!(
                        target: "weightcache::integrity",
                        resource = %spec.id,
                        %expected,
                        %actual,
                        "SHA-256 mismatch"
                    ),
                    _ => debug!(resource = %spec.id, "SHA-256 verified"),
                }
                status
            }
            Err(e) => {
                warn!(
                    target: "weightcache::integrity",
                    resource = %spec.id,
                    error = %e,
                    "Could not hash materialized file"
                );
                IntegrityStatus::Unverifiable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(feature = "tokio")]
impl Materializer {
    /// Run [`Materializer::materialize`] on the blocking thread pool
    pub async fn materialize_async(&self, id: &str) -> Result<Materialization> {
        let this = self.clone();
        let id = id.to_owned();
        tokio::task::spawn_blocking(move || this.materialize(&id))
            .await
            .map_err(|e| Error::io_no_path(io::Error::other(e), "join materialization task"))?
    }
}

/// Remove a file, treating absence as success.
///
/// Returns whether a file was removed.
fn remove_if_exists(path: &Path) -> Result<bool> {
    #[cfg(not(unix))]
    clear_readonly(path);
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(e, path, "remove")),
    }
}

/// Check that the rename moved our staged file and not a concurrent attempt's.
///
/// A foreign file at the canonical path may still be growing, so it is
/// removed.
fn confirm_promoted(ours: &fs::Metadata, staging: &Path, canonical: &Path) -> Result<()> {
    let promoted = fs::metadata(canonical).map_err(|e| {
        Error::promotion_failed(
            staging,
            canonical,
            "promoted file disappeared",
            Some(e),
        )
    })?;
    if same_file(ours, &promoted) {
        return Ok(());
    }
    warn!(path = %canonical.display(), "Renamed a concurrent attempt's staging file; removing it");
    discard(canonical);
    Err(Error::promotion_failed(
        staging,
        canonical,
        "staging file was replaced by a concurrent attempt during promotion",
        None,
    ))
}

/// Best-effort removal of a rejected file
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!(path = %path.display(), error = %e, "Failed to discard staging file");
    }
}

#[cfg(not(unix))]
fn clear_readonly(path: &Path) {
    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
    }
}

/// Make the promoted file world-readable and not writable
fn harden(path: &Path) {
    let result = fs::metadata(path).and_then(|metadata| {
        let mut perms = metadata.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o444);
        }
        #[cfg(not(unix))]
        perms.set_readonly(true);
        fs::set_permissions(path, perms)
    });
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to mark materialized file read-only");
    }
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Header of a file on disk, for diagnostics
pub fn inspect_header(path: &Path) -> Result<Header> {
    let file = File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    read_header(file).map_err(|e| Error::io(e, path, "read header"))
}
