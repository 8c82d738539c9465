//! Engine-wide compilation configuration
//!
//! A cache-producing compile must be fully eager and deterministic: a
//! source-stripped unit can never be lazily recompiled later, so any function
//! not compiled at cache-production time would become permanently unreachable.
//! `EagerCompileGuard` scopes that override and restores the prior
//! configuration on every exit path.

/// Engine compilation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Compile function bodies on first call instead of up front
    pub lazy_compilation: bool,
    /// Produce byte-stable output (zeroed metadata timestamp)
    pub deterministic: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lazy_compilation: true,
            deterministic: false,
        }
    }
}

impl EngineConfig {
    /// The configuration every cache-producing compile runs under
    pub fn cache_flags() -> Self {
        Self {
            lazy_compilation: false,
            deterministic: true,
        }
    }

    /// Hash of the compile-relevant flags, stored in cache blob headers
    pub fn flags_hash(&self) -> u32 {
        crc32fast::hash(&[self.lazy_compilation as u8, self.deterministic as u8])
    }
}

/// Scoped override forcing eager, deterministic compilation.
///
/// Holds an exclusive borrow of the engine configuration for its lifetime, so
/// overlapping overrides cannot clobber each other's saved state. The prior
/// configuration is restored on drop, including early returns and panics.
#[derive(Debug)]
pub struct EagerCompileGuard<'a> {
    config: &'a mut EngineConfig,
    saved: EngineConfig,
}

impl<'a> EagerCompileGuard<'a> {
    /// Override the configuration with [`EngineConfig::cache_flags`]
    pub fn enter(config: &'a mut EngineConfig) -> Self {
        let saved = *config;
        *config = EngineConfig::cache_flags();
        Self { config, saved }
    }

    /// The active (overridden) configuration
    pub fn config(&self) -> &EngineConfig {
        self.config
    }
}

impl Drop for EagerCompileGuard<'_> {
    fn drop(&mut self) {
        *self.config = self.saved;
    }
}
