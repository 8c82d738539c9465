//! Serialized bytecode cache blobs
//!
//! A cache blob is a 20-byte header followed by an encoded module:
//!
//! ```text
//! magic (4) | version_hash (u32) | flags_hash (u32) | checksum (u32) | payload_len (u32)
//! ```
//!
//! Acceptance requires magic, version hash, flags hash, checksum, and payload
//! length to match — and nothing else. There is deliberately no
//! source-identity field: a blob produced for one source string is
//! structurally indistinguishable from one produced for any other, as long as
//! the bytecode and metadata agree. This is an intentional integrity/secrecy
//! trade-off, not an omission; callers must never infer source-content
//! correctness from a passing sanity check.

use crate::bytecode;

/// Magic number for cache blobs: "CAPC"
pub const CACHE_MAGIC: [u8; 4] = *b"CAPC";

/// Size of the cache blob header in bytes
pub const CACHE_HEADER_LEN: usize = 20;

/// Hash identifying the bytecode format revision
pub fn version_hash() -> u32 {
    let mut tag = Vec::with_capacity(24);
    tag.extend_from_slice(b"capsule-bytecode-");
    tag.extend_from_slice(&bytecode::VERSION.to_le_bytes());
    crc32fast::hash(&tag)
}

/// Outcome of a cache blob sanity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityCheck {
    /// Header and payload are structurally acceptable
    Ok,
    /// Magic number does not match
    MagicMismatch,
    /// Blob was produced by a different bytecode format revision
    VersionMismatch,
    /// Blob was produced under different compile flags
    FlagsMismatch,
    /// Payload checksum does not match
    ChecksumMismatch,
    /// Declared payload length disagrees with the blob size
    PayloadOutOfRange,
}

impl SanityCheck {
    /// Whether the blob passed
    pub fn is_ok(&self) -> bool {
        matches!(self, SanityCheck::Ok)
    }
}

/// Wrap encoded module bytes in a cache blob header.
///
/// Panics if the payload does not fit the header's `u32` length field; a
/// header must never declare a length other than the payload's actual size.
pub fn wrap(module_bytes: &[u8], flags_hash: u32) -> Vec<u8> {
    assert!(
        module_bytes.len() <= u32::MAX as usize,
        "cache payload of {} bytes exceeds the u32 header length field",
        module_bytes.len()
    );
    let mut blob = Vec::with_capacity(CACHE_HEADER_LEN + module_bytes.len());
    blob.extend_from_slice(&CACHE_MAGIC);
    blob.extend_from_slice(&version_hash().to_le_bytes());
    blob.extend_from_slice(&flags_hash.to_le_bytes());
    blob.extend_from_slice(&crc32fast::hash(module_bytes).to_le_bytes());
    blob.extend_from_slice(&(module_bytes.len() as u32).to_le_bytes());
    blob.extend_from_slice(module_bytes);
    blob
}

/// Sanity-check a cache blob against the expected flags hash.
///
/// Checks structure only; says nothing about what source the blob was
/// compiled from.
pub fn sanity_check(blob: &[u8], expected_flags_hash: u32) -> SanityCheck {
    if blob.len() < 4 || blob[0..4] != CACHE_MAGIC {
        return SanityCheck::MagicMismatch;
    }
    if blob.len() < CACHE_HEADER_LEN {
        return SanityCheck::PayloadOutOfRange;
    }

    let read_u32 = |at: usize| u32::from_le_bytes([blob[at], blob[at + 1], blob[at + 2], blob[at + 3]]);

    if read_u32(4) != version_hash() {
        return SanityCheck::VersionMismatch;
    }
    if read_u32(8) != expected_flags_hash {
        return SanityCheck::FlagsMismatch;
    }
    let checksum = read_u32(12);
    let payload_len = read_u32(16) as usize;
    if payload_len != blob.len() - CACHE_HEADER_LEN {
        return SanityCheck::PayloadOutOfRange;
    }
    if crc32fast::hash(&blob[CACHE_HEADER_LEN..]) != checksum {
        return SanityCheck::ChecksumMismatch;
    }
    SanityCheck::Ok
}

/// The payload slice of a structurally valid blob.
///
/// Returns `None` unless the header declares a length consistent with the
/// blob size; run [`sanity_check`] first for full validation.
pub fn payload(blob: &[u8]) -> Option<&[u8]> {
    if blob.len() < CACHE_HEADER_LEN {
        return None;
    }
    let payload_len =
        u32::from_le_bytes([blob[16], blob[17], blob[18], blob[19]]) as usize;
    if payload_len != blob.len() - CACHE_HEADER_LEN {
        return None;
    }
    Some(&blob[CACHE_HEADER_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn flags_hash() -> u32 {
        EngineConfig::cache_flags().flags_hash()
    }

    #[test]
    fn test_wrap_and_check() {
        let blob = wrap(b"fake module bytes", flags_hash());
        assert_eq!(sanity_check(&blob, flags_hash()), SanityCheck::Ok);
        assert_eq!(payload(&blob), Some(&b"fake module bytes"[..]));
    }

    #[test]
    fn test_magic_mismatch() {
        let mut blob = wrap(b"payload", flags_hash());
        blob[0] = b'X';
        assert_eq!(sanity_check(&blob, flags_hash()), SanityCheck::MagicMismatch);
    }

    #[test]
    fn test_version_mismatch() {
        let mut blob = wrap(b"payload", flags_hash());
        blob[4] ^= 0xFF;
        assert_eq!(sanity_check(&blob, flags_hash()), SanityCheck::VersionMismatch);
    }

    #[test]
    fn test_flags_mismatch() {
        let blob = wrap(b"payload", flags_hash());
        let other = EngineConfig::default().flags_hash();
        assert_eq!(sanity_check(&blob, other), SanityCheck::FlagsMismatch);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut blob = wrap(b"payload", flags_hash());
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert_eq!(sanity_check(&blob, flags_hash()), SanityCheck::ChecksumMismatch);
    }

    #[test]
    fn test_payload_out_of_range() {
        let mut blob = wrap(b"payload", flags_hash());
        blob.truncate(blob.len() - 3);
        assert_eq!(sanity_check(&blob, flags_hash()), SanityCheck::PayloadOutOfRange);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    #[should_panic(expected = "exceeds the u32 header length field")]
    fn test_wrap_rejects_payload_beyond_u32() {
        // Zeroed allocation only; wrap must refuse before touching the bytes.
        let oversized = vec![0u8; u32::MAX as usize + 1];
        let _ = wrap(&oversized, 0);
    }

    #[test]
    fn test_check_is_source_blind() {
        // Two blobs wrapping identical bytes pass identically no matter what
        // source they claim to have come from; there is no source field.
        let a = wrap(b"same bytecode", flags_hash());
        let b = wrap(b"same bytecode", flags_hash());
        assert_eq!(a, b);
        assert_eq!(
            sanity_check(&a, flags_hash()),
            sanity_check(&b, flags_hash())
        );
    }
}
