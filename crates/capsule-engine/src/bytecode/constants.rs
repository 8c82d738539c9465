//! String constant pool

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use rustc_hash::FxHashMap;

/// Deduplicated pool of string constants referenced by index from bytecode
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    strings: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its pool index
    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(&idx) = self.index.get(value) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.index.insert(value.to_string(), idx);
        idx
    }

    /// Look up a string by index
    pub fn get(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(|s| s.as_str())
    }

    /// Number of pooled strings
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Encode the pool to binary
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_str(s);
        }
    }

    /// Decode a pool from binary
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u32()? as usize;
        let mut pool = Self::new();
        for _ in 0..count {
            let s = reader.read_str()?;
            // Preserve indices exactly; decoded pools are already deduplicated.
            let idx = pool.strings.len() as u32;
            pool.index.insert(s.clone(), idx);
            pool.strings.push(s);
        }
        Ok(pool)
    }
}
