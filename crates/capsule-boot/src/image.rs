//! Self-contained executable image layout
//!
//! A bundled executable is the byte-exact concatenation
//! `[engine binary][prelude bytes][payload archive bytes][trailer]`. The
//! trailer is a fixed-width binary struct written as real bytes by the bundle
//! build step — magic plus four native-endian offsets — so locating it never
//! depends on recognizable literals inside script text. A zero prelude offset
//! is the "no embedded prelude" sentinel, not an error.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

/// Magic number identifying a bundled image trailer
pub const TRAILER_MAGIC: [u8; 8] = *b"CAPSIMG\0";

/// Size of the trailer in bytes: magic + four u64 fields
pub const TRAILER_LEN: usize = 40;

/// Image errors
#[derive(Debug, Error)]
pub enum ImageError {
    /// Underlying I/O failure
    #[error("Image I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Offsets and lengths of the data appended to the engine binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTrailer {
    /// Byte offset of the prelude, or zero when no prelude is embedded
    pub prelude_offset: u64,
    /// Length of the prelude in bytes
    pub prelude_len: u64,
    /// Byte offset of the payload archive, or zero when absent
    pub payload_offset: u64,
    /// Length of the payload archive in bytes
    pub payload_len: u64,
}

impl ImageTrailer {
    /// Whether a prelude is embedded
    pub fn has_prelude(&self) -> bool {
        self.prelude_offset != 0
    }

    /// Length of the engine binary before any appended data.
    ///
    /// `total_len` is the full file size including the trailer.
    pub fn engine_len(&self, total_len: u64) -> u64 {
        if self.prelude_offset != 0 {
            self.prelude_offset
        } else if self.payload_offset != 0 {
            self.payload_offset
        } else {
            total_len.saturating_sub(TRAILER_LEN as u64)
        }
    }

    /// Serialize to the on-disk representation (native-endian fields)
    pub fn to_bytes(&self) -> [u8; TRAILER_LEN] {
        let mut bytes = [0u8; TRAILER_LEN];
        bytes[0..8].copy_from_slice(&TRAILER_MAGIC);
        bytes[8..16].copy_from_slice(&self.prelude_offset.to_ne_bytes());
        bytes[16..24].copy_from_slice(&self.prelude_len.to_ne_bytes());
        bytes[24..32].copy_from_slice(&self.payload_offset.to_ne_bytes());
        bytes[32..40].copy_from_slice(&self.payload_len.to_ne_bytes());
        bytes
    }

    /// Parse the on-disk representation; `None` when the magic is absent
    pub fn from_bytes(bytes: &[u8; TRAILER_LEN]) -> Option<Self> {
        if bytes[0..8] != TRAILER_MAGIC {
            return None;
        }
        let read_u64 = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_ne_bytes(buf)
        };
        Some(Self {
            prelude_offset: read_u64(8),
            prelude_len: read_u64(16),
            payload_offset: read_u64(24),
            payload_len: read_u64(32),
        })
    }
}

/// Concatenate an image and its trailer into `out`.
///
/// Empty prelude/payload sections are recorded with the zero-offset sentinel.
pub fn write_image<W: Write>(
    out: &mut W,
    engine: &[u8],
    prelude: &[u8],
    payload: &[u8],
) -> Result<ImageTrailer, ImageError> {
    let prelude_offset = if prelude.is_empty() {
        0
    } else {
        engine.len() as u64
    };
    let payload_offset = if payload.is_empty() {
        0
    } else {
        (engine.len() + prelude.len()) as u64
    };
    let trailer = ImageTrailer {
        prelude_offset,
        prelude_len: prelude.len() as u64,
        payload_offset,
        payload_len: payload.len() as u64,
    };

    out.write_all(engine)?;
    out.write_all(prelude)?;
    out.write_all(payload)?;
    out.write_all(&trailer.to_bytes())?;
    Ok(trailer)
}

/// Read the trailer from the end of a file.
///
/// Returns `None` for files that carry no trailer (not bundled).
pub fn read_trailer(path: &Path) -> Result<Option<ImageTrailer>, ImageError> {
    let mut file = File::open(path)?;
    let total_len = file.seek(SeekFrom::End(0))?;
    if total_len < TRAILER_LEN as u64 {
        return Ok(None);
    }
    file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))?;
    let mut bytes = [0u8; TRAILER_LEN];
    file.read_exact(&mut bytes)?;
    Ok(ImageTrailer::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_roundtrip() {
        let trailer = ImageTrailer {
            prelude_offset: 1000,
            prelude_len: 50,
            payload_offset: 1050,
            payload_len: 200,
        };
        let bytes = trailer.to_bytes();
        assert_eq!(ImageTrailer::from_bytes(&bytes), Some(trailer));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = ImageTrailer {
            prelude_offset: 1,
            prelude_len: 1,
            payload_offset: 2,
            payload_len: 1,
        }
        .to_bytes();
        bytes[0] = b'X';
        assert_eq!(ImageTrailer::from_bytes(&bytes), None);
    }

    #[test]
    fn test_write_image_layout() {
        // Engine of 1000 bytes, prelude of 50 at offset 1000, payload of 200
        // at offset 1050 — independent of section contents.
        let engine = vec![0xAA; 1000];
        let prelude = vec![0xBB; 50];
        let payload = vec![0xCC; 200];

        let mut image = Vec::new();
        let trailer = write_image(&mut image, &engine, &prelude, &payload).unwrap();

        assert_eq!(trailer.prelude_offset, 1000);
        assert_eq!(trailer.prelude_len, 50);
        assert_eq!(trailer.payload_offset, 1050);
        assert_eq!(trailer.payload_len, 200);
        assert_eq!(image.len(), 1250 + TRAILER_LEN);
        assert_eq!(&image[1000..1050], &prelude[..]);
        assert_eq!(&image[1050..1250], &payload[..]);
        assert_eq!(trailer.engine_len(image.len() as u64), 1000);
    }

    #[test]
    fn test_empty_sections_use_zero_sentinel() {
        let engine = vec![0x11; 64];
        let mut image = Vec::new();
        let trailer = write_image(&mut image, &engine, &[], &[]).unwrap();

        assert_eq!(trailer.prelude_offset, 0);
        assert!(!trailer.has_prelude());
        assert_eq!(trailer.payload_offset, 0);
        assert_eq!(trailer.engine_len(image.len() as u64), 64);
    }

    #[test]
    fn test_read_trailer_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bundled");

        let mut image = Vec::new();
        let written = write_image(&mut image, b"engine", b"prelude", b"payload!").unwrap();
        std::fs::write(&path, &image).unwrap();

        let read = read_trailer(&path).unwrap().unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn test_read_trailer_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, vec![0u8; 512]).unwrap();
        assert_eq!(read_trailer(&path).unwrap(), None);

        let tiny = dir.path().join("tiny");
        std::fs::write(&tiny, b"xs").unwrap();
        assert_eq!(read_trailer(&tiny).unwrap(), None);
    }
}
