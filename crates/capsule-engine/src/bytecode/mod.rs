//! Capsule VM bytecode definitions
//!
//! This module provides the instruction set, module format, and constant
//! pool structures for the Capsule virtual machine.

pub mod constants;
pub mod encoder;
pub mod module;
pub mod opcode;

pub use constants::ConstantPool;
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use module::{
    flags, Function, FunctionCode, Metadata, Module, ModuleError, SourceSpan, MAGIC, VERSION,
};
pub use opcode::Opcode;
