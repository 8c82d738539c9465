//! Binary encoding helpers for bytecode modules
//!
//! All multi-byte integers use little-endian byte order as the canonical
//! on-disk format.

use thiserror::Error;

/// Errors produced while decoding binary bytecode data
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Ran out of bytes mid-read
    #[error("Unexpected end of data: wanted {wanted} bytes at offset {offset}, {available} available")]
    UnexpectedEof {
        /// Bytes requested
        wanted: usize,
        /// Read position
        offset: usize,
        /// Bytes remaining
        available: usize,
    },

    /// String data was not valid UTF-8
    #[error("Invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 {
        /// Read position
        offset: usize,
    },

    /// Unknown opcode byte
    #[error("Invalid opcode byte: {0:#04x}")]
    InvalidOpcode(u8),
}

/// Append-only bytecode writer
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    /// Underlying buffer
    pub buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write offset
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Emit a single byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a u16 (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a u32 (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a u64 (little-endian)
    pub fn emit_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit an i64 (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_str(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit raw bytes without a length prefix
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Overwrite a previously emitted u32 at the given offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Consume the writer, returning the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Sequential bytecode reader
#[derive(Debug)]
pub struct BytecodeReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a reader over the given bytes
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether all bytes have been consumed
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Read `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + count > self.data.len() {
            return Err(DecodeError::UnexpectedEof {
                wanted: count,
                offset: self.pos,
                available: self.data.len() - self.pos,
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a u16 (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a u32 (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a u64 (little-endian)
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Read an i64 (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.read_u64()? as i64)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let offset = self.pos;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }
}
