//! Capsule Scripting Engine
//!
//! This crate provides the Capsule language implementation and the
//! sourceless-execution subsystem used by self-contained executables:
//! - **Parser**: Lexer and parser (`parser` module)
//! - **Compiler**: Bytecode generation with lazy/eager body compilation
//!   (`compiler` module)
//! - **VM**: Stack interpreter and native registry (`vm` module)
//! - **Sourceless subsystem**: compiled units with a source sum type,
//!   cache blobs, the cache validator, and the script host binding
//!   (`unit`, `cache`, `config`, `host` modules)
//!
//! # Example
//!
//! ```rust,ignore
//! use capsule_engine::{CompileOptions, ScriptHost};
//!
//! let mut host = ScriptHost::new();
//!
//! // Produce a source-stripped cache blob
//! let produced = host.compile(source, CompileOptions {
//!     sourceless: true,
//!     produce_cached_data: true,
//!     ..Default::default()
//! })?;
//!
//! // Later, rebuild the unit from the blob alone
//! let mut outcome = host.compile("", CompileOptions {
//!     sourceless: true,
//!     cached_data: produced.cached_data,
//!     ..Default::default()
//! })?;
//! host.execute(&mut outcome.unit, &mut std::io::stdout())?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Parser module: lexer, AST, and parser
pub mod parser;

/// Compiler module: bytecode generation
pub mod compiler;

/// Bytecode module: instruction set, module format, encoding
pub mod bytecode;

/// VM module: interpreter and native registry
pub mod vm;

/// Engine compilation configuration and the eager-compile guard
pub mod config;

/// Compiled units and source-presence handling
pub mod unit;

/// Serialized cache blobs and the cache validator
pub mod cache;

/// The script host compile binding
pub mod host;

// ============================================================================
// Re-exports
// ============================================================================

pub use bytecode::{
    BytecodeReader, BytecodeWriter, ConstantPool, DecodeError, Function, FunctionCode, Metadata,
    Module, ModuleError, Opcode, SourceSpan,
};
pub use cache::{payload, sanity_check, version_hash, wrap, SanityCheck, CACHE_MAGIC};
pub use compiler::{compile, CompileError, MAIN_FUNCTION};
pub use config::{EagerCompileGuard, EngineConfig};
pub use host::{CompileOptions, CompileOutcome, HostError, ScriptHost};
pub use parser::{LexError, ParseError};
pub use unit::{CompiledUnit, ReparseError, ScriptSource, SOURCELESS_FUNCTION_TEXT};
pub use vm::{NativeCtx, NativeFn, NativeRegistry, Value, Vm, VmError};
