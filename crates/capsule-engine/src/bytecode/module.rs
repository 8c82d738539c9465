//! Bytecode module format

use super::constants::ConstantPool;
use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use thiserror::Error;

/// Magic number for Capsule bytecode modules: "CAPB"
pub const MAGIC: [u8; 4] = *b"CAPB";

/// Current bytecode version
pub const VERSION: u32 = 1;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected CAPB, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value
        actual: u32,
    },

    /// A function body was never compiled, so the module cannot be serialized
    #[error("Function '{0}' has a deferred body; eager compilation is required before encoding")]
    DeferredFunction(String),
}

/// Module flags
pub mod flags {
    /// Every function body was compiled eagerly
    pub const EAGER: u32 = 1 << 0;
    /// Module was produced by a deterministic compile (stable metadata)
    pub const DETERMINISTIC: u32 = 1 << 1;
}

/// Byte range into the unit's source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    /// Start byte offset (inclusive)
    pub start: u32,
    /// End byte offset (exclusive)
    pub end: u32,
}

impl SourceSpan {
    /// Create a span from byte offsets
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Length of the span in bytes
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the span is empty
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Executable state of a function body
#[derive(Debug, Clone)]
pub enum FunctionCode {
    /// Body compiled to bytecode
    Compiled(Vec<u8>),
    /// Body not yet compiled; the source span will be compiled on first call
    Deferred,
}

impl FunctionCode {
    /// Whether the body has been compiled
    pub fn is_compiled(&self) -> bool {
        matches!(self, FunctionCode::Compiled(_))
    }
}

/// A compiled (or deferred) function
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name (`<main>` for the top-level body)
    pub name: String,
    /// Number of parameters
    pub arity: u8,
    /// Number of local variable slots, including parameters
    pub local_count: u16,
    /// Parameter names, needed when a deferred body is compiled later
    pub params: Vec<String>,
    /// Source byte range of the body, when the unit was compiled from text
    pub span: Option<SourceSpan>,
    /// Body bytecode, or a deferred marker
    pub code: FunctionCode,
}

impl Function {
    fn encode(&self, writer: &mut BytecodeWriter) -> Result<(), ModuleError> {
        let code = match &self.code {
            FunctionCode::Compiled(code) => code,
            FunctionCode::Deferred => {
                return Err(ModuleError::DeferredFunction(self.name.clone()));
            }
        };

        writer.emit_str(&self.name);
        writer.emit_u8(self.arity);
        writer.emit_u16(self.local_count);
        writer.emit_u32(self.params.len() as u32);
        for param in &self.params {
            writer.emit_str(param);
        }
        match self.span {
            Some(span) => {
                writer.emit_u8(1);
                writer.emit_u32(span.start);
                writer.emit_u32(span.end);
            }
            None => writer.emit_u8(0),
        }
        writer.emit_u32(code.len() as u32);
        writer.emit_bytes(code);
        Ok(())
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_str()?;
        let arity = reader.read_u8()?;
        let local_count = reader.read_u16()?;
        let param_count = reader.read_u32()? as usize;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            params.push(reader.read_str()?);
        }
        let span = match reader.read_u8()? {
            0 => None,
            _ => {
                let start = reader.read_u32()?;
                let end = reader.read_u32()?;
                Some(SourceSpan::new(start, end))
            }
        };
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?.to_vec();
        Ok(Self {
            name,
            arity,
            local_count,
            params,
            span,
            code: FunctionCode::Compiled(code),
        })
    }
}

/// Module metadata
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Module name
    pub name: String,
    /// Source file path, if any
    pub source_file: Option<String>,
    /// Unix timestamp of compilation; zero under deterministic compilation
    pub compiled_at: u64,
}

impl Metadata {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_str(&self.name);
        match &self.source_file {
            Some(path) => {
                writer.emit_u8(1);
                writer.emit_str(path);
            }
            None => writer.emit_u8(0),
        }
        writer.emit_u64(self.compiled_at);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_str()?;
        let source_file = match reader.read_u8()? {
            0 => None,
            _ => Some(reader.read_str()?),
        };
        let compiled_at = reader.read_u64()?;
        Ok(Self {
            name,
            source_file,
            compiled_at,
        })
    }
}

/// A compiled Capsule module
///
/// Function index 0 is always the top-level `<main>` body.
#[derive(Debug, Clone)]
pub struct Module {
    /// Magic number (must be "CAPB")
    pub magic: [u8; 4],
    /// Bytecode version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// Constant pool
    pub constants: ConstantPool,
    /// Function table; index 0 is `<main>`
    pub functions: Vec<Function>,
    /// Module metadata
    pub metadata: Metadata,
    /// SHA-256 checksum of the encoded body
    pub checksum: [u8; 32],
}

impl Module {
    /// Create an empty module with the given name
    pub fn new(name: String) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            constants: ConstantPool::new(),
            functions: Vec::new(),
            metadata: Metadata {
                name,
                source_file: None,
                compiled_at: 0,
            },
            checksum: [0u8; 32],
        }
    }

    /// Look up a function index by name
    pub fn function_index(&self, name: &str) -> Option<u32> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u32)
    }

    /// Whether every function body is compiled
    pub fn is_fully_compiled(&self) -> bool {
        self.functions.iter().all(|f| f.code.is_compiled())
    }

    /// Encode the module to binary format
    ///
    /// Layout:
    /// - Header: magic (4) + version (u32) + flags (u32) + crc32 (u32) + sha256 (32)
    /// - Constant pool
    /// - Function table
    /// - Metadata
    ///
    /// Fails if any function body is still deferred.
    pub fn encode(&self) -> Result<Vec<u8>, ModuleError> {
        use sha2::{Digest, Sha256};

        let mut writer = BytecodeWriter::new();

        let header_start = writer.offset();
        writer.emit_bytes(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let crc32_offset = writer.offset();
        writer.emit_u32(0); // Placeholder for CRC32
        let sha256_offset = writer.offset();
        writer.emit_bytes(&[0u8; 32]); // Placeholder for SHA-256

        self.constants.encode(&mut writer);

        writer.emit_u32(self.functions.len() as u32);
        for func in &self.functions {
            func.encode(&mut writer)?;
        }

        self.metadata.encode(&mut writer);

        // Checksums cover everything after the header
        let body_start = header_start + 48;
        let body = writer.buffer[body_start..].to_vec();
        let crc32 = crc32fast::hash(&body);
        let sha256: [u8; 32] = Sha256::digest(&body).into();

        writer.patch_u32(crc32_offset, crc32);
        writer.buffer[sha256_offset..sha256_offset + 32].copy_from_slice(&sha256);

        Ok(writer.into_bytes())
    }

    /// Decode a module from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        use sha2::{Digest, Sha256};

        let mut reader = BytecodeReader::new(data);

        let magic_bytes = reader.read_bytes(4)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(magic_bytes);
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_crc32 = reader.read_u32()?;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(reader.read_bytes(32)?);

        let body = &data[48..];
        let actual_crc32 = crc32fast::hash(body);
        if stored_crc32 != actual_crc32 {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_crc32,
                actual: actual_crc32,
            });
        }
        let actual_sha256 = Sha256::digest(body);
        if checksum != actual_sha256.as_slice() {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_crc32,
                actual: actual_crc32,
            });
        }

        let constants = ConstantPool::decode(&mut reader)?;

        let func_count = reader.read_u32()? as usize;
        let mut functions = Vec::with_capacity(func_count);
        for _ in 0..func_count {
            functions.push(Function::decode(&mut reader)?);
        }

        let metadata = Metadata::decode(&mut reader)?;

        Ok(Self {
            magic,
            version,
            flags,
            constants,
            functions,
            metadata,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;

    fn test_module() -> Module {
        let mut module = Module::new("test".to_string());
        module.flags = flags::EAGER | flags::DETERMINISTIC;
        module.functions.push(Function {
            name: "<main>".to_string(),
            arity: 0,
            local_count: 0,
            params: vec![],
            span: Some(SourceSpan::new(0, 10)),
            code: FunctionCode::Compiled(vec![Opcode::ConstNull as u8, Opcode::Return as u8]),
        });
        module
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let module = test_module();
        let bytes = module.encode().unwrap();

        let decoded = Module::decode(&bytes).unwrap();
        assert_eq!(decoded.version, VERSION);
        assert_eq!(decoded.flags, flags::EAGER | flags::DETERMINISTIC);
        assert_eq!(decoded.functions.len(), 1);
        assert_eq!(decoded.functions[0].name, "<main>");
        assert!(decoded.functions[0].code.is_compiled());
    }

    #[test]
    fn test_corrupted_body_rejected() {
        let module = test_module();
        let mut bytes = module.encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let module = test_module();
        let mut bytes = module.encode().unwrap();
        bytes[0] = b'X';

        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_deferred_body_blocks_encoding() {
        let mut module = test_module();
        module.functions.push(Function {
            name: "later".to_string(),
            arity: 0,
            local_count: 0,
            params: vec![],
            span: Some(SourceSpan::new(20, 30)),
            code: FunctionCode::Deferred,
        });

        assert!(matches!(
            module.encode(),
            Err(ModuleError::DeferredFunction(name)) if name == "later"
        ));
    }
}
