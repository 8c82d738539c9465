//! Compiled script units and source-presence handling
//!
//! A unit's source slot is a sum type, not a sentinel string: every consumer
//! pattern-matches on [`ScriptSource`] before touching source text. Once a
//! unit is stripped to `Sourceless`, its text is never restored, its bytecode
//! is never flush-eligible (there is nothing to recompile from), and re-parse
//! entry points fail fast.

use crate::bytecode::{FunctionCode, Module, SourceSpan};
use crate::compiler::{self, CompileError};
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

/// Whether a recorded span addresses a valid slice of the given text.
///
/// Spans travel inside cache blobs, and the cache is source-blind: an
/// accepted blob may have been produced from a different source string than
/// the one the unit now holds. A span that does not land on char boundaries
/// inside the current text is treated exactly like an absent span.
fn span_in_source(text: &str, span: SourceSpan) -> bool {
    let (start, end) = (span.start as usize, span.end as usize);
    start <= end
        && end <= text.len()
        && text.is_char_boundary(start)
        && text.is_char_boundary(end)
}

/// Fixed placeholder returned when stringifying a function whose source text
/// has been discarded
pub const SOURCELESS_FUNCTION_TEXT: &str = "fn () { [bytecode] }";

/// Source slot of a compiled unit
#[derive(Debug, Clone)]
pub enum ScriptSource {
    /// Original text is retained
    Sourced(Arc<str>),
    /// Original text was deliberately discarded after compilation
    Sourceless,
}

/// Errors from the lazy recompile path
#[derive(Debug, Error)]
pub enum ReparseError {
    /// The unit is sourceless; there is no text to recompile from
    #[error("Cannot reparse: unit has no source text")]
    NoSource,

    /// The function carries no source span
    #[error("Cannot reparse '{0}': no recorded source span")]
    NoSpan(String),

    /// The function index is out of range
    #[error("Invalid function index: {0}")]
    InvalidFunction(usize),

    /// Recompilation itself failed
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// A compiled script together with its source slot and compile bookkeeping
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// Compiled module; function 0 is the top-level body
    pub module: Module,
    source: ScriptSource,
    /// Length in bytes of the original source text, recorded before any
    /// stripping. Cache-production bookkeeping reads this rather than the
    /// source slot, so a zero-length placeholder is never misclassified as a
    /// genuine cache hit.
    pub source_len: usize,
    /// Script filename, if provided
    pub filename: Option<String>,
    /// Line offset applied to diagnostics
    pub line_offset: u32,
    /// Column offset applied to diagnostics
    pub column_offset: u32,
}

impl CompiledUnit {
    /// Create a unit that retains its source text
    pub fn sourced(module: Module, source: &str) -> Self {
        Self {
            module,
            source: ScriptSource::Sourced(Arc::from(source)),
            source_len: source.len(),
            filename: None,
            line_offset: 0,
            column_offset: 0,
        }
    }

    /// Create a unit restored from cached bytecode with no source text
    pub fn sourceless(module: Module) -> Self {
        Self {
            module,
            source: ScriptSource::Sourceless,
            source_len: 0,
            filename: None,
            line_offset: 0,
            column_offset: 0,
        }
    }

    /// The unit's source slot
    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    /// Source text, if retained
    pub fn source_text(&self) -> Option<&str> {
        match &self.source {
            ScriptSource::Sourced(text) => Some(text),
            ScriptSource::Sourceless => None,
        }
    }

    /// Whether the source text has been discarded
    pub fn is_sourceless(&self) -> bool {
        matches!(self.source, ScriptSource::Sourceless)
    }

    /// Discard the source text permanently.
    ///
    /// Callers must capture any cache bytes first; after this, the unit can
    /// never be recompiled, flushed, or stringified from text again.
    pub fn strip_source(&mut self) {
        self.source = ScriptSource::Sourceless;
    }

    /// Render a function back to text.
    ///
    /// For sourced units this slices the recorded span. For sourceless units
    /// (or functions whose span is absent or does not fit the current source
    /// text) it returns the fixed placeholder without touching source
    /// storage.
    pub fn function_text(&self, fn_idx: usize) -> Option<Cow<'_, str>> {
        let func = self.module.functions.get(fn_idx)?;
        match (&self.source, func.span) {
            (ScriptSource::Sourced(text), Some(span)) if span_in_source(text, span) => {
                Some(Cow::Borrowed(&text[span.start as usize..span.end as usize]))
            }
            _ => Some(Cow::Borrowed(SOURCELESS_FUNCTION_TEXT)),
        }
    }

    /// Whether a function's bytecode may be reclaimed under memory pressure.
    ///
    /// Flushing expects a future recompile from source, so sourceless units
    /// are never eligible: flushing them would be unrecoverable.
    pub fn can_flush(&self, fn_idx: usize) -> bool {
        match (&self.source, self.module.functions.get(fn_idx)) {
            (ScriptSource::Sourced(text), Some(func)) => func
                .span
                .map_or(false, |span| span_in_source(text, span)),
            _ => false,
        }
    }

    /// Reclaim a function's compiled bytecode, reverting it to deferred.
    ///
    /// Returns `false` (and leaves the unit untouched) when the function is
    /// not flush-eligible.
    pub fn flush_function(&mut self, fn_idx: usize) -> bool {
        if !self.can_flush(fn_idx) {
            return false;
        }
        self.module.functions[fn_idx].code = FunctionCode::Deferred;
        true
    }

    /// Compile a deferred function body from the unit's source text.
    ///
    /// Fails fast with [`ReparseError::NoSource`] for sourceless units rather
    /// than dereferencing absent text.
    pub fn reparse_function(&mut self, fn_idx: usize) -> Result<(), ReparseError> {
        if fn_idx >= self.module.functions.len() {
            return Err(ReparseError::InvalidFunction(fn_idx));
        }
        let source = match &self.source {
            ScriptSource::Sourced(text) => Arc::clone(text),
            ScriptSource::Sourceless => return Err(ReparseError::NoSource),
        };
        match self.module.functions[fn_idx].span {
            Some(span) if span_in_source(&source, span) => {}
            _ => {
                let name = self.module.functions[fn_idx].name.clone();
                return Err(ReparseError::NoSpan(name));
            }
        }
        compiler::compile_deferred_body(&mut self.module, fn_idx, &source)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::config::EngineConfig;

    fn lazy_unit(source: &str) -> CompiledUnit {
        let module = compile(source, &EngineConfig::default(), "test", None).unwrap();
        CompiledUnit::sourced(module, source)
    }

    #[test]
    fn test_sourced_function_text_slices_span() {
        let unit = lazy_unit("fn f(x) { return x; }");
        let text = unit.function_text(1).unwrap();
        assert_eq!(text.trim(), "return x;");
    }

    #[test]
    fn test_strip_source_is_permanent() {
        let mut unit = lazy_unit("fn f(x) { return x; }");
        assert!(unit.source_text().is_some());
        unit.strip_source();
        assert!(unit.is_sourceless());
        assert!(unit.source_text().is_none());
        assert_eq!(unit.function_text(1).unwrap(), SOURCELESS_FUNCTION_TEXT);
    }

    #[test]
    fn test_sourceless_not_flush_eligible() {
        let mut unit = lazy_unit("fn f(x) { return x; }");
        assert!(unit.can_flush(1));
        unit.strip_source();
        assert!(!unit.can_flush(1));
        assert!(!unit.flush_function(1));
    }

    #[test]
    fn test_flush_then_reparse_roundtrip() {
        let mut unit = lazy_unit("fn f(x) { return x + 1; }");
        unit.reparse_function(1).unwrap();
        assert!(unit.module.is_fully_compiled());

        assert!(unit.flush_function(1));
        assert!(!unit.module.is_fully_compiled());

        unit.reparse_function(1).unwrap();
        assert!(unit.module.is_fully_compiled());
    }

    #[test]
    fn test_span_from_other_source_treated_as_absent() {
        // The cache carries no source identity, so a unit can legally pair a
        // module with a source string the module was not compiled from. Spans
        // that do not fit the paired text must behave like absent spans.
        let producing = "fn f(x) { let y = x + 1; return y * 2; } print(f(3));";
        let module = compile(producing, &EngineConfig::default(), "test", None).unwrap();
        let mut unit = CompiledUnit::sourced(module, "print(9);");

        assert_eq!(unit.function_text(1).unwrap(), SOURCELESS_FUNCTION_TEXT);
        assert!(!unit.can_flush(1));
        assert!(!unit.flush_function(1));
        assert!(matches!(
            unit.reparse_function(1),
            Err(ReparseError::NoSpan(_))
        ));
    }

    #[test]
    fn test_reparse_fails_fast_without_source() {
        let mut unit = lazy_unit("fn f(x) { return x; }");
        unit.strip_source();
        assert!(matches!(unit.reparse_function(1), Err(ReparseError::NoSource)));
    }
}
