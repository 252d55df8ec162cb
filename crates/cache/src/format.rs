//! Structural header checks for NNUE weight files
//!
//! A raw NNUE file opens with two little-endian `u32` markers: the format
//! version followed by the network architecture hash. Checking these eight
//! bytes rejects the wrong file, a compressed file, or a copy that started at
//! the wrong offset before any full-content hashing happens.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};

/// NNUE format version marker (`20 2F F3 7A` on disk)
pub const NNUE_VERSION: u32 = 0x7AF3_2F20;

/// NNUE architecture hash marker (`4A D3 24 6E` on disk)
pub const NNUE_ARCH_HASH: u32 = 0x6E24_D34A;

/// Number of leading bytes read for header inspection
pub const HEADER_LEN: usize = 16;

/// Expected version and hash markers of a weight file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatSignature {
    /// Format version marker
    pub version: u32,
    /// Architecture hash marker
    pub hash: u32,
}

impl Default for FormatSignature {
    fn default() -> Self {
        Self::NNUE
    }
}

impl FormatSignature {
    /// Signature of the bundled Pikafish network
    pub const NNUE: Self = Self {
        version: NNUE_VERSION,
        hash: NNUE_ARCH_HASH,
    };

    /// The eight magic bytes as they appear on disk
    #[must_use]
    pub fn magic(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..].copy_from_slice(&self.hash.to_le_bytes());
        out
    }

    /// Whether `header` starts with this signature
    #[must_use]
    pub fn matches(&self, header: &Header) -> bool {
        header.as_bytes().starts_with(&self.magic())
    }

    /// Magic bytes formatted the way headers are logged
    #[must_use]
    pub fn magic_hex(&self) -> String {
        hex_bytes(&self.magic())
    }
}

/// Leading bytes of a file, at most [`HEADER_LEN`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    bytes: [u8; HEADER_LEN],
    len: usize,
}

impl Header {
    /// Build a header from the first bytes of `data`
    #[must_use]
    pub fn from_prefix(data: &[u8]) -> Self {
        let len = data.len().min(HEADER_LEN);
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..len].copy_from_slice(&data[..len]);
        Self { bytes, len }
    }

    /// Bytes actually read
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Version marker, if at least four bytes were read
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.word(0)
    }

    /// Architecture hash marker, if at least eight bytes were read
    #[must_use]
    pub fn hash(&self) -> Option<u32> {
        self.word(4)
    }

    /// Space-separated upper-case hex, e.g. `20 2F F3 7A ...`
    #[must_use]
    pub fn hex(&self) -> String {
        hex_bytes(self.as_bytes())
    }

    fn word(&self, offset: usize) -> Option<u32> {
        let raw = self.as_bytes().get(offset..offset + 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

/// Read up to [`HEADER_LEN`] bytes from the start of `reader`.
///
/// Short inputs yield a short header rather than an error.
pub fn read_header<R: Read>(reader: R) -> io::Result<Header> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    reader.take(HEADER_LEN as u64).read_to_end(&mut buf)?;
    Ok(Header::from_prefix(&buf))
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NNUE_PREFIX: [u8; 8] = [0x20, 0x2F, 0xF3, 0x7A, 0x4A, 0xD3, 0x24, 0x6E];

    #[test]
    fn nnue_magic_matches_on_disk_bytes() {
        assert_eq!(FormatSignature::NNUE.magic(), NNUE_PREFIX);
        assert_eq!(
            FormatSignature::NNUE.magic_hex(),
            "20 2F F3 7A 4A D3 24 6E"
        );
    }

    #[test]
    fn header_decodes_markers() {
        let mut data = NNUE_PREFIX.to_vec();
        data.extend_from_slice(&[0xAA; 32]);
        let header = read_header(&data[..]).unwrap();

        assert_eq!(header.as_bytes().len(), HEADER_LEN);
        assert_eq!(header.version(), Some(NNUE_VERSION));
        assert_eq!(header.hash(), Some(NNUE_ARCH_HASH));
        assert!(FormatSignature::NNUE.matches(&header));
    }

    #[test]
    fn short_header_is_not_an_error() {
        let header = read_header(&[0x20, 0x2F, 0xF3][..]).unwrap();
        assert_eq!(header.as_bytes(), &[0x20, 0x2F, 0xF3]);
        assert_eq!(header.version(), None);
        assert_eq!(header.hash(), None);
        assert!(!FormatSignature::NNUE.matches(&header));
        assert_eq!(header.hex(), "20 2F F3");
    }

    #[test]
    fn zstd_frame_is_rejected() {
        let header = read_header(&[0x28, 0xB5, 0x2F, 0xFD, 0, 0, 0, 0, 0][..]).unwrap();
        assert!(!FormatSignature::NNUE.matches(&header));
    }

    #[test]
    fn custom_signature_roundtrips_through_toml() {
        let sig: FormatSignature = toml::from_str("version = 1\nhash = 0x10").unwrap();
        assert_eq!(sig.magic(), [1, 0, 0, 0, 0x10, 0, 0, 0]);
    }

    proptest! {
        #[test]
        fn any_other_prefix_is_rejected(prefix in proptest::array::uniform8(any::<u8>()), tail in proptest::collection::vec(any::<u8>(), 0..16)) {
            prop_assume!(prefix != NNUE_PREFIX);
            let mut data = prefix.to_vec();
            data.extend(tail);
            let header = Header::from_prefix(&data);
            prop_assert!(!FormatSignature::NNUE.matches(&header));
        }

        #[test]
        fn nnue_prefix_always_accepted(tail in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut data = NNUE_PREFIX.to_vec();
            data.extend(tail);
            let header = Header::from_prefix(&data);
            prop_assert!(FormatSignature::NNUE.matches(&header));
        }
    }
}
