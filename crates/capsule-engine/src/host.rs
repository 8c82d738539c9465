//! Script host binding: the public compile entry point
//!
//! Wires the flag guard, cache validator, and sourceless transform into the
//! "compile possibly from cache" path:
//!
//! | sourceless | produce_cached_data | cached_data | effect                                   |
//! |------------|---------------------|-------------|------------------------------------------|
//! | false      | any                 | any         | standard compile                         |
//! | true       | true                | —           | eager deterministic compile, cache built |
//! | true       | false               | accepted    | consume cache, then strip source         |
//! | true       | false               | rejected    | ConfigurationError, no source fallback   |
//!
//! Single-threaded by contract: one host, one execution context at a time.

use crate::cache::{self, SanityCheck};
use crate::compiler::{self, CompileError};
use crate::config::{EagerCompileGuard, EngineConfig};
use crate::unit::CompiledUnit;
use crate::vm::{NativeRegistry, Value, Vm, VmError};
use crate::bytecode::{Module, ModuleError};
use std::io::Write;
use thiserror::Error;

/// Host-level compile errors
#[derive(Debug, Error)]
pub enum HostError {
    /// Sourceless compile could not proceed; startup must abort
    #[error("Configuration error: {reason}")]
    Configuration {
        /// What went wrong
        reason: String,
        /// Whether supplied cached data was rejected
        cached_data_rejected: bool,
    },

    /// Compilation failed through the standard path
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Cached module bytes failed to decode
    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Options for [`ScriptHost::compile`]
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Script filename for diagnostics
    pub filename: Option<String>,
    /// Line offset applied to diagnostics
    pub line_offset: u32,
    /// Column offset applied to diagnostics
    pub column_offset: u32,
    /// Produce or consume a source-stripped unit
    pub sourceless: bool,
    /// Build a cache blob from a fully eager, deterministic compile
    pub produce_cached_data: bool,
    /// Previously produced cache blob to consume
    pub cached_data: Option<Vec<u8>>,
}

/// Result of [`ScriptHost::compile`]
#[derive(Debug)]
pub struct CompileOutcome {
    /// The compiled unit
    pub unit: CompiledUnit,
    /// Cache blob, when one was produced
    pub cached_data: Option<Vec<u8>>,
    /// Whether `cached_data` was produced by this compile
    pub cached_data_produced: bool,
    /// Whether supplied cached data was rejected
    pub cached_data_rejected: bool,
}

/// The script host: engine configuration, natives, and the compile binding
#[derive(Debug)]
pub struct ScriptHost {
    /// Engine compilation configuration
    pub config: EngineConfig,
    /// Native handler registry
    pub natives: NativeRegistry,
    process_args: Vec<String>,
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptHost {
    /// Create a host with default configuration and builtins
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            natives: NativeRegistry::with_defaults(),
            process_args: Vec::new(),
        }
    }

    /// Create a host exposing the given process arguments to scripts
    pub fn with_args(process_args: Vec<String>) -> Self {
        Self {
            process_args,
            ..Self::new()
        }
    }

    /// The process arguments scripts will observe
    pub fn process_args(&self) -> &[String] {
        &self.process_args
    }

    /// Replace the process arguments scripts will observe
    pub fn set_process_args(&mut self, args: Vec<String>) {
        self.process_args = args;
    }

    /// Compile a script, possibly producing or consuming a cache blob
    pub fn compile(
        &mut self,
        source: &str,
        options: CompileOptions,
    ) -> Result<CompileOutcome, HostError> {
        if !options.sourceless {
            return self.compile_standard(source, options);
        }
        if options.produce_cached_data {
            return self.compile_produce(source, options);
        }
        self.compile_consume(source, options)
    }

    /// Standard compile. A supplied cache blob is consumed opportunistically;
    /// rejection is recoverable here because the source is retained.
    fn compile_standard(
        &mut self,
        source: &str,
        options: CompileOptions,
    ) -> Result<CompileOutcome, HostError> {
        let mut cached_data_rejected = false;

        if let Some(blob) = &options.cached_data {
            let expected = EngineConfig::cache_flags().flags_hash();
            if cache::sanity_check(blob, expected) == SanityCheck::Ok {
                let module = Module::decode(cache::payload(blob).unwrap_or_default())?;
                let mut unit = CompiledUnit::sourced(module, source);
                apply_options(&mut unit, &options);
                return Ok(CompileOutcome {
                    unit,
                    cached_data: None,
                    cached_data_produced: false,
                    cached_data_rejected: false,
                });
            }
            cached_data_rejected = true;
        }

        let name = options.filename.as_deref().unwrap_or("<script>");
        let module = compiler::compile(source, &self.config, name, options.filename.as_deref())?;
        let mut unit = CompiledUnit::sourced(module, source);
        apply_options(&mut unit, &options);
        Ok(CompileOutcome {
            unit,
            cached_data: None,
            cached_data_produced: false,
            cached_data_rejected,
        })
    }

    /// Cache-producing sourceless compile: force eager determinism for the
    /// duration, capture the blob, then strip the source.
    fn compile_produce(
        &mut self,
        source: &str,
        options: CompileOptions,
    ) -> Result<CompileOutcome, HostError> {
        let name = options.filename.as_deref().unwrap_or("<script>");

        let module = {
            let guard = EagerCompileGuard::enter(&mut self.config);
            compiler::compile(source, guard.config(), name, options.filename.as_deref())?
        };

        let flags_hash = EngineConfig::cache_flags().flags_hash();
        let module_bytes = module.encode()?;
        let blob = cache::wrap(&module_bytes, flags_hash);

        // The unit keeps its real source length for cache bookkeeping even
        // though the text itself is about to go away.
        let mut unit = CompiledUnit::sourced(module, source);
        apply_options(&mut unit, &options);
        unit.strip_source();

        Ok(CompileOutcome {
            unit,
            cached_data: Some(blob),
            cached_data_produced: true,
            cached_data_rejected: false,
        })
    }

    /// Cache-consuming sourceless compile: the blob is the only way to build
    /// the unit, so rejection is fatal — there is no source to fall back to.
    fn compile_consume(
        &mut self,
        _source: &str,
        options: CompileOptions,
    ) -> Result<CompileOutcome, HostError> {
        let blob = match &options.cached_data {
            Some(blob) => blob,
            None => {
                return Err(HostError::Configuration {
                    reason: "sourceless compile requires cached_data or produce_cached_data"
                        .to_string(),
                    cached_data_rejected: false,
                })
            }
        };

        let expected = EngineConfig::cache_flags().flags_hash();
        let check = cache::sanity_check(blob, expected);
        if check != SanityCheck::Ok {
            return Err(HostError::Configuration {
                reason: format!("cached data rejected ({:?}); no source available to fall back to", check),
                cached_data_rejected: true,
            });
        }

        let module = Module::decode(cache::payload(blob).unwrap_or_default())?;
        let mut unit = CompiledUnit::sourceless(module);
        apply_options(&mut unit, &options);
        Ok(CompileOutcome {
            unit,
            cached_data: None,
            cached_data_produced: false,
            cached_data_rejected: false,
        })
    }

    /// Execute a unit's top-level body against this host's natives
    pub fn execute(
        &mut self,
        unit: &mut CompiledUnit,
        output: &mut dyn Write,
    ) -> Result<Value, VmError> {
        self.execute_with_globals(unit, Vec::new(), output)
    }

    /// Execute with predefined globals (the prelude invocation contract)
    pub fn execute_with_globals(
        &mut self,
        unit: &mut CompiledUnit,
        globals: Vec<(String, Value)>,
        output: &mut dyn Write,
    ) -> Result<Value, VmError> {
        let mut vm = Vm::with_args(self.process_args.clone());
        for (name, value) in globals {
            vm.set_global(&name, value);
        }
        vm.execute(unit, &self.natives, output)
    }
}

fn apply_options(unit: &mut CompiledUnit, options: &CompileOptions) {
    unit.filename = options.filename.clone();
    unit.line_offset = options.line_offset;
    unit.column_offset = options.column_offset;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sourceless_produce(source: &str) -> (ScriptHost, CompileOutcome) {
        let mut host = ScriptHost::new();
        let outcome = host
            .compile(
                source,
                CompileOptions {
                    sourceless: true,
                    produce_cached_data: true,
                    ..Default::default()
                },
            )
            .unwrap();
        (host, outcome)
    }

    #[test]
    fn test_standard_compile_unaffected() {
        let mut host = ScriptHost::new();
        let outcome = host.compile("let x = 1;", CompileOptions::default()).unwrap();
        assert!(!outcome.unit.is_sourceless());
        assert!(!outcome.cached_data_produced);
        assert!(outcome.cached_data.is_none());
        // Default config still lazy
        assert!(host.config.lazy_compilation);
    }

    #[test]
    fn test_produce_path_builds_cache_and_strips_source() {
        let source = "fn f(x) { return x; } print(f(1));";
        let (host, outcome) = sourceless_produce(source);

        assert!(outcome.cached_data_produced);
        assert!(outcome.cached_data.is_some());
        assert!(outcome.unit.is_sourceless());
        assert_eq!(outcome.unit.source_len, source.len());
        assert!(outcome.unit.module.is_fully_compiled());
        // Guard restored the config afterwards
        assert_eq!(host.config, EngineConfig::default());
    }

    #[test]
    fn test_consume_path_accepts_blob() {
        let source = "print(41 + 1);";
        let (mut host, produced) = sourceless_produce(source);

        let outcome = host
            .compile(
                "",
                CompileOptions {
                    sourceless: true,
                    cached_data: produced.cached_data,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(outcome.unit.is_sourceless());
        assert!(!outcome.cached_data_rejected);
    }

    #[test]
    fn test_consume_without_blob_is_configuration_error() {
        let mut host = ScriptHost::new();
        let err = host
            .compile(
                "print(1);",
                CompileOptions {
                    sourceless: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            HostError::Configuration {
                cached_data_rejected: false,
                ..
            }
        ));
    }

    #[test]
    fn test_rejected_blob_is_fatal_not_silent_recompile() {
        let (mut host, produced) = sourceless_produce("print(1);");
        let mut blob = produced.cached_data.unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;

        let err = host
            .compile(
                "print(2);",
                CompileOptions {
                    sourceless: true,
                    cached_data: Some(blob),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            HostError::Configuration {
                cached_data_rejected: true,
                ..
            }
        ));
    }

    #[test]
    fn test_standard_compile_recovers_from_rejected_blob() {
        let mut host = ScriptHost::new();
        let outcome = host
            .compile(
                "print(3);",
                CompileOptions {
                    cached_data: Some(vec![0xDE, 0xAD]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(outcome.cached_data_rejected);
        assert!(!outcome.unit.is_sourceless());
    }
}
