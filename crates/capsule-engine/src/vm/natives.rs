//! Native function registry
//!
//! Named host functions callable from bytecode. Handlers are looked up by
//! name at call time and may be replaced by re-registering under the same
//! name — the bootstrap loader uses this to shim and later restore the file
//! introspection primitives.

use super::{Value, VmError};
use rustc_hash::FxHashMap;
use std::io::Write;
use std::sync::Arc;

/// Context handed to native handlers
pub struct NativeCtx<'a> {
    /// Output sink (the VM's console)
    pub output: &'a mut dyn Write,
    /// Read-only view of the VM globals
    pub globals: &'a FxHashMap<String, Value>,
    /// Process argument list as seen by the script
    pub process_args: &'a [String],
}

/// A native handler
pub type NativeFn =
    Arc<dyn Fn(&mut NativeCtx<'_>, &[Value]) -> Result<Value, VmError> + Send + Sync>;

/// Registry of named native handlers
#[derive(Default, Clone)]
pub struct NativeRegistry {
    handlers: FxHashMap<String, NativeFn>,
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("count", &self.handlers.len())
            .finish()
    }
}

impl NativeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the default builtins installed
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        super::defaults::install_defaults(&mut registry);
        registry
    }

    /// Register (or replace) a handler under a name
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&mut NativeCtx<'_>, &[Value]) -> Result<Value, VmError> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Look up a handler by name
    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.handlers.get(name).cloned()
    }

    /// Whether a handler is registered under the name
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
