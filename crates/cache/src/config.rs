//! Materializer configuration
//!
//! Settings come from an optional `weightcache.toml`; anything left unset
//! falls back to defaults suitable for the bundled Pikafish network.
//!
//! ```toml
//! cache_dir = "/var/cache/xiangqi"
//! bundle_dir = "assets"
//! reuse = "size_only"
//!
//! [[resources]]
//! id = "pikafish.nnue"
//! min_size = 52428800
//! sha256 = "ec1649d0f32d000f22f6ee8f7e339ff27c2e967ea1ff5580603bb6bb686bbd56"
//! signature = { version = 0x7AF32F20, hash = 0x6E24D34A }
//! ```

use crate::resource::{ResourceId, ResourceSpec};
use crate::{Error, Result};
use dirs::cache_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Default copy and hash buffer size (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "WEIGHTCACHE_CACHE_DIR";

/// When an existing cached file may be handed out without re-copying
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Reuse any regular file at least as large as the declared minimum
    #[default]
    SizeOnly,
    /// Reuse only after re-checking size, header and declared digest
    Revalidate,
    /// Always copy from the bundle
    Never,
}

impl ReusePolicy {
    /// Stable string form of the policy
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SizeOnly => "size_only",
            Self::Revalidate => "revalidate",
            Self::Never => "never",
        }
    }
}

impl std::fmt::Display for ReusePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReusePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "size_only" => Ok(Self::SizeOnly),
            "revalidate" => Ok(Self::Revalidate),
            "never" => Ok(Self::Never),
            _ => Err(Error::configuration(format!("Unknown reuse policy: {s}"))),
        }
    }
}

/// Top-level configuration file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Writable cache directory; resolved from the environment when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Directory holding bundled resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_dir: Option<PathBuf>,
    /// Bounded buffer used for copying and hashing
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Reuse policy for already-materialized files
    #[serde(default)]
    pub reuse: ReusePolicy,
    /// Mark promoted files read-only for every user
    #[serde(default = "default_true")]
    pub harden_permissions: bool,
    /// Decode zstd-compressed bundled resources
    #[serde(default = "default_true")]
    pub decompress: bool,
    /// Declared resources
    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceSpec>,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

const fn default_true() -> bool {
    true
}

fn default_resources() -> Vec<ResourceSpec> {
    vec![ResourceSpec::pikafish()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            bundle_dir: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reuse: ReusePolicy::default(),
            harden_permissions: true,
            decompress: true,
            resources: default_resources(),
        }
    }
}

impl Config {
    /// Parse and validate TOML configuration
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    ///
    /// Relative `cache_dir` and `bundle_dir` entries are resolved against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.cache_dir = config.cache_dir.map(|p| base.join(p));
            config.bundle_dir = config.bundle_dir.map(|p| base.join(p));
        }
        Ok(config)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::configuration("buffer_size must be greater than zero"));
        }
        let mut seen = BTreeSet::new();
        for spec in &self.resources {
            if !seen.insert(spec.id.as_str()) {
                return Err(Error::configuration(format!(
                    "Resource '{}' is declared more than once",
                    spec.id
                )));
            }
        }
        Ok(())
    }

    /// Look up a declared resource
    pub fn resource(&self, id: &ResourceId) -> Result<&ResourceSpec> {
        self.resources
            .iter()
            .find(|spec| spec.id == *id)
            .ok_or_else(|| Error::configuration(format!("Resource '{id}' is not declared")))
    }

    /// Declared resource, mutable, for command-line overrides
    pub fn resource_mut(&mut self, id: &ResourceId) -> Result<&mut ResourceSpec> {
        self.resources
            .iter_mut()
            .find(|spec| spec.id == *id)
            .ok_or_else(|| Error::configuration(format!("Resource '{id}' is not declared")))
    }

    /// The configured cache directory, or one resolved from the environment
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => cache_root(),
        }
    }
}

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
pub struct CacheInputs {
    /// `WEIGHTCACHE_CACHE_DIR`
    pub override_dir: Option<PathBuf>,
    /// `XDG_CACHE_HOME`
    pub xdg_cache_home: Option<PathBuf>,
    /// Platform cache directory
    pub os_cache_dir: Option<PathBuf>,
    /// Temporary directory fallback
    pub temp_dir: PathBuf,
}

impl CacheInputs {
    /// Gather inputs from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            override_dir: non_empty_env(CACHE_DIR_ENV),
            xdg_cache_home: non_empty_env("XDG_CACHE_HOME"),
            os_cache_dir: cache_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Pick the first usable cache directory.
///
/// Resolution order (first writable wins):
/// 1) `WEIGHTCACHE_CACHE_DIR` (explicit override)
/// 2) `XDG_CACHE_HOME/weightcache`
/// 3) OS cache dir/weightcache
/// 4) `TMPDIR/weightcache` (fallback)
///
/// Candidates under `/homeless-shelter` are skipped. Nix build sandboxes set
/// `HOME` there and the directory is never writable.
pub fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.override_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("weightcache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("weightcache"));
    }
    candidates.push(inputs.temp_dir.join("weightcache"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        // An existing directory may still be read-only (sandboxed $HOME).
        if path.exists() {
            let probe = path.join(".write_probe");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Resolve the cache directory from the process environment
pub fn cache_root() -> Result<PathBuf> {
    cache_root_from_inputs(CacheInputs::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatSignature;
    use crate::resource::PIKAFISH_NNUE;
    use tempfile::TempDir;

    fn inputs(temp: &TempDir) -> CacheInputs {
        CacheInputs {
            override_dir: None,
            xdg_cache_home: None,
            os_cache_dir: None,
            temp_dir: temp.path().join("tmp"),
        }
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.buffer_size, 65_536);
        assert_eq!(config.reuse, ReusePolicy::SizeOnly);
        assert!(config.harden_permissions);
        assert_eq!(config.resources.len(), 1);
        assert_eq!(config.resources[0].id.as_str(), PIKAFISH_NNUE);
    }

    #[test]
    fn full_file_parses() {
        let config = Config::from_toml_str(
            r#"
cache_dir = "/cache"
bundle_dir = "/assets"
buffer_size = 4096
reuse = "revalidate"
harden_permissions = false
decompress = false

[[resources]]
id = "xiangqi.nnue"
min_size = 41943040
sha256 = "EC1649D0F32D000F22F6EE8F7E339FF27C2E967EA1FF5580603BB6BB686BBD56"
signature = { version = 0x7AF32F20, hash = 0x6E24D34A }
"#,
        )
        .unwrap();

        assert_eq!(config.cache_dir.as_deref(), Some(Path::new("/cache")));
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.reuse, ReusePolicy::Revalidate);
        assert!(!config.harden_permissions);
        assert!(!config.decompress);

        let id = ResourceId::new("xiangqi.nnue").unwrap();
        let spec = config.resource(&id).unwrap();
        assert_eq!(spec.min_size, 40 * 1024 * 1024);
        assert_eq!(spec.signature, FormatSignature::NNUE);
        assert_eq!(
            spec.sha256.as_ref().unwrap().as_hex(),
            "ec1649d0f32d000f22f6ee8f7e339ff27c2e967ea1ff5580603bb6bb686bbd56"
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Config::from_toml_str("cache_directory = \"/x\"").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn rejects_zero_buffer() {
        assert!(Config::from_toml_str("buffer_size = 0").is_err());
    }

    #[test]
    fn rejects_duplicate_resources() {
        let err = Config::from_toml_str(
            r#"
[[resources]]
id = "a.nnue"
min_size = 1

[[resources]]
id = "a.nnue"
min_size = 2
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_malformed_digest() {
        assert!(
            Config::from_toml_str("[[resources]]\nid = \"a\"\nmin_size = 1\nsha256 = \"abc\"")
                .is_err()
        );
    }

    #[test]
    fn undeclared_resource_is_configuration_error() {
        let config = Config::default();
        let err = config
            .resource(&ResourceId::new("other.nnue").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn load_resolves_relative_dirs_against_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("weightcache.toml");
        std::fs::write(&path, "cache_dir = \"cache\"\nbundle_dir = \"assets\"").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache_dir, Some(temp.path().join("cache")));
        assert_eq!(config.bundle_dir, Some(temp.path().join("assets")));
    }

    #[test]
    fn load_missing_file_is_io_failure() {
        let temp = TempDir::new().unwrap();
        let err = Config::load(&temp.path().join("nope.toml")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::IoFailure);
    }

    #[test]
    fn reuse_policy_parses_cli_spellings() {
        assert_eq!("size-only".parse::<ReusePolicy>().unwrap(), ReusePolicy::SizeOnly);
        assert_eq!("REVALIDATE".parse::<ReusePolicy>().unwrap(), ReusePolicy::Revalidate);
        assert_eq!("never".parse::<ReusePolicy>().unwrap(), ReusePolicy::Never);
        assert!("sometimes".parse::<ReusePolicy>().is_err());
    }

    #[test]
    fn cache_root_respects_override() {
        let temp = TempDir::new().unwrap();
        let override_dir = temp.path().join("override");
        let mut inputs = inputs(&temp);
        inputs.override_dir = Some(override_dir.clone());
        inputs.xdg_cache_home = Some(temp.path().join("xdg"));

        assert_eq!(cache_root_from_inputs(inputs).unwrap(), override_dir);
        assert!(override_dir.is_dir());
    }

    #[test]
    fn cache_root_prefers_xdg_over_os_dir() {
        let temp = TempDir::new().unwrap();
        let mut inputs = inputs(&temp);
        inputs.xdg_cache_home = Some(temp.path().join("xdg"));
        inputs.os_cache_dir = Some(temp.path().join("os"));

        assert_eq!(
            cache_root_from_inputs(inputs).unwrap(),
            temp.path().join("xdg").join("weightcache")
        );
    }

    #[test]
    fn cache_root_falls_back_to_temp() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            cache_root_from_inputs(inputs(&temp)).unwrap(),
            temp.path().join("tmp").join("weightcache")
        );
    }

    #[test]
    fn cache_root_skips_homeless_shelter() {
        let temp = TempDir::new().unwrap();
        let mut inputs = inputs(&temp);
        inputs.override_dir = Some(PathBuf::from("/homeless-shelter/cache"));

        assert_eq!(
            cache_root_from_inputs(inputs).unwrap(),
            temp.path().join("tmp").join("weightcache")
        );
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/explicit")),
            ..Config::default()
        };
        assert_eq!(config.resolve_cache_dir().unwrap(), PathBuf::from("/explicit"));
    }
}
