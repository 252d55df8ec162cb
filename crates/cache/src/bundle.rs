//! Read-only access to bundled resources
//!
//! A [`Bundle`] opens a fresh stream per copy attempt. Streams that begin with
//! a zstd frame are decoded on the fly so the cache always holds the raw
//! network, whichever form was packaged.

use crate::resource::ResourceId;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Leading bytes of a zstd frame
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Source of bundled, read-only resources
pub trait Bundle: Send + Sync + fmt::Debug {
    /// Open a new stream over the named resource
    fn open(&self, id: &ResourceId) -> io::Result<Box<dyn Read + Send>>;
}

/// Resources stored as files under an asset directory
#[derive(Debug, Clone)]
pub struct DirBundle {
    root: PathBuf,
    decompress: bool,
}

impl DirBundle {
    /// Create a bundle rooted at `root`, decoding zstd-framed resources
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            decompress: true,
        }
    }

    /// Enable or disable transparent zstd decoding
    #[must_use]
    pub fn with_decompression(mut self, enabled: bool) -> Self {
        self.decompress = enabled;
        self
    }

    /// Asset directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a resource inside the asset directory
    #[must_use]
    pub fn resource_path(&self, id: &ResourceId) -> PathBuf {
        self.root.join(id.as_str())
    }
}

impl Bundle for DirBundle {
    fn open(&self, id: &ResourceId) -> io::Result<Box<dyn Read + Send>> {
        let path = self.resource_path(id);
        debug!(resource = %id, ?path, "Opening bundled resource");
        let file = File::open(&path)?;
        if self.decompress {
            decode_if_compressed(file)
        } else {
            Ok(Box::new(file))
        }
    }
}

/// Resources held in memory, e.g. embedded with `include_bytes!`
#[derive(Debug, Clone)]
pub struct MemoryBundle {
    entries: BTreeMap<ResourceId, Arc<[u8]>>,
    decompress: bool,
}

impl Default for MemoryBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBundle {
    /// Create an empty bundle that decodes zstd-framed resources
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            decompress: true,
        }
    }

    /// Add or replace a resource
    #[must_use]
    pub fn with_resource(mut self, id: ResourceId, data: impl Into<Arc<[u8]>>) -> Self {
        self.insert(id, data);
        self
    }

    /// Add or replace a resource in place
    pub fn insert(&mut self, id: ResourceId, data: impl Into<Arc<[u8]>>) {
        self.entries.insert(id, data.into());
    }

    /// Enable or disable transparent zstd decoding
    #[must_use]
    pub fn with_decompression(mut self, enabled: bool) -> Self {
        self.decompress = enabled;
        self
    }
}

impl Bundle for MemoryBundle {
    fn open(&self, id: &ResourceId) -> io::Result<Box<dyn Read + Send>> {
        let data = self.entries.get(id).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("resource '{id}' is not bundled"),
            )
        })?;
        let reader = Cursor::new(ArcBytes(data));
        if self.decompress {
            decode_if_compressed(reader)
        } else {
            Ok(Box::new(reader))
        }
    }
}

struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Wrap `reader` in a zstd decoder if its first bytes are a zstd frame
fn decode_if_compressed<R>(reader: R) -> io::Result<Box<dyn Read + Send>>
where
    R: Read + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    if reader.fill_buf()?.starts_with(&ZSTD_MAGIC) {
        debug!("Bundled resource is zstd-compressed; decoding while copying");
        Ok(Box::new(zstd::stream::read::Decoder::with_buffer(reader)?))
    } else {
        Ok(Box::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(name: &str) -> ResourceId {
        ResourceId::new(name).unwrap()
    }

    fn read_all(mut reader: Box<dyn Read + Send>) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn dir_bundle_reads_plain_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("net.nnue"), b"raw weights").unwrap();

        let bundle = DirBundle::new(temp.path());
        assert_eq!(read_all(bundle.open(&id("net.nnue")).unwrap()), b"raw weights");
    }

    #[test]
    fn dir_bundle_missing_resource_is_not_found() {
        let temp = TempDir::new().unwrap();
        let bundle = DirBundle::new(temp.path());
        let err = bundle.open(&id("missing.nnue")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn dir_bundle_decodes_zstd() {
        let temp = TempDir::new().unwrap();
        let raw = vec![0x42u8; 200_000];
        let compressed = zstd::encode_all(&raw[..], 3).unwrap();
        assert!(compressed.starts_with(&ZSTD_MAGIC));
        std::fs::write(temp.path().join("net.nnue"), &compressed).unwrap();

        let bundle = DirBundle::new(temp.path());
        assert_eq!(read_all(bundle.open(&id("net.nnue")).unwrap()), raw);

        let passthrough = DirBundle::new(temp.path()).with_decompression(false);
        assert_eq!(
            read_all(passthrough.open(&id("net.nnue")).unwrap()),
            compressed
        );
    }

    #[test]
    fn memory_bundle_serves_fresh_streams() {
        let bundle = MemoryBundle::new().with_resource(id("a.bin"), b"abc".to_vec());
        assert_eq!(read_all(bundle.open(&id("a.bin")).unwrap()), b"abc");
        assert_eq!(read_all(bundle.open(&id("a.bin")).unwrap()), b"abc");
        assert_eq!(
            bundle.open(&id("b.bin")).err().unwrap().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn empty_resource_is_readable() {
        let bundle = MemoryBundle::new().with_resource(id("empty"), Vec::<u8>::new());
        assert!(read_all(bundle.open(&id("empty")).unwrap()).is_empty());
    }
}
