//! Bytecode code generation
//!
//! Compiles a parsed program into a [`Module`]. Function index 0 is the
//! top-level `<main>` body; `fn` declarations follow in source order. Under
//! lazy compilation, function bodies are left deferred and compiled from
//! their recorded source spans on first call.

use crate::bytecode::{
    flags, ConstantPool, Function, FunctionCode, Module, Opcode, SourceSpan, BytecodeWriter,
};
use crate::config::EngineConfig;
use crate::parser::{self, BinaryOp, CompileFrontError, Expr, Stmt};
use rustc_hash::FxHashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Name of the synthesized top-level function
pub const MAIN_FUNCTION: &str = "<main>";

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// Lexing or parsing failed
    #[error(transparent)]
    Front(#[from] CompileFrontError),

    /// Call with the wrong number of arguments
    #[error("Function '{name}' expects {expected} arguments, got {got}")]
    ArityMismatch {
        /// Callee name
        name: String,
        /// Declared parameter count
        expected: u8,
        /// Argument count at the call site
        got: usize,
    },

    /// Two `fn` declarations share a name
    #[error("Duplicate function '{0}'")]
    DuplicateFunction(String),

    /// More parameters than the arity byte can represent
    #[error("Function '{0}' has too many parameters")]
    TooManyParams(String),

    /// More locals than the slot index can represent
    #[error("Function '{0}' has too many local variables")]
    TooManyLocals(String),

    /// More call arguments than the operand byte can represent
    #[error("Call to '{0}' has too many arguments")]
    TooManyArgs(String),
}

/// Compile a source string into a module
pub fn compile(
    source: &str,
    config: &EngineConfig,
    name: &str,
    source_file: Option<&str>,
) -> Result<Module, CompileError> {
    let program = parser::parse(source)?;

    let mut module = Module::new(name.to_string());
    module.metadata.source_file = source_file.map(|s| s.to_string());
    module.metadata.compiled_at = if config.deterministic {
        0
    } else {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    };
    if !config.lazy_compilation {
        module.flags |= flags::EAGER;
    }
    if config.deterministic {
        module.flags |= flags::DETERMINISTIC;
    }

    // Register all functions first so call sites can resolve forward references.
    module.functions.push(Function {
        name: MAIN_FUNCTION.to_string(),
        arity: 0,
        local_count: 0,
        params: vec![],
        span: Some(SourceSpan::new(0, source.len() as u32)),
        code: FunctionCode::Deferred,
    });

    let mut fn_table: FxHashMap<String, (u32, u8)> = FxHashMap::default();
    for stmt in &program.stmts {
        if let Stmt::Fn {
            name, params, body_span, ..
        } = stmt
        {
            if fn_table.contains_key(name) {
                return Err(CompileError::DuplicateFunction(name.clone()));
            }
            if params.len() > u8::MAX as usize {
                return Err(CompileError::TooManyParams(name.clone()));
            }
            let idx = module.functions.len() as u32;
            fn_table.insert(name.clone(), (idx, params.len() as u8));
            module.functions.push(Function {
                name: name.clone(),
                arity: params.len() as u8,
                local_count: params.len() as u16,
                params: params.clone(),
                span: Some(*body_span),
                code: FunctionCode::Deferred,
            });
        }
    }

    // Top-level body is always compiled; it runs immediately.
    let top_level: Vec<&Stmt> = program
        .stmts
        .iter()
        .filter(|s| !matches!(s, Stmt::Fn { .. }))
        .collect();
    let (code, local_count) =
        gen_body(&mut module.constants, &fn_table, &[], &top_level, true, MAIN_FUNCTION)?;
    module.functions[0].code = FunctionCode::Compiled(code);
    module.functions[0].local_count = local_count;

    // Function bodies: eager mode compiles them now, lazy mode leaves the
    // deferred marker and relies on the recorded span.
    if !config.lazy_compilation {
        for stmt in &program.stmts {
            if let Stmt::Fn { name, params, body, .. } = stmt {
                let (idx, _) = fn_table[name];
                let body_refs: Vec<&Stmt> = body.iter().collect();
                let (code, local_count) =
                    gen_body(&mut module.constants, &fn_table, params, &body_refs, false, name)?;
                module.functions[idx as usize].code = FunctionCode::Compiled(code);
                module.functions[idx as usize].local_count = local_count;
            }
        }
    }

    Ok(module)
}

/// Compile a deferred function body in place from the unit's source text
pub(crate) fn compile_deferred_body(
    module: &mut Module,
    fn_idx: usize,
    source: &str,
) -> Result<(), CompileError> {
    let (span, params, name) = {
        let func = &module.functions[fn_idx];
        (
            func.span.expect("deferred function must carry a span"),
            func.params.clone(),
            func.name.clone(),
        )
    };

    let fragment = &source[span.start as usize..span.end as usize];
    let stmts = parser::parse_body(fragment)?;

    let mut fn_table: FxHashMap<String, (u32, u8)> = FxHashMap::default();
    for (idx, func) in module.functions.iter().enumerate() {
        if func.name != MAIN_FUNCTION {
            fn_table.insert(func.name.clone(), (idx as u32, func.arity));
        }
    }

    let stmt_refs: Vec<&Stmt> = stmts.iter().collect();
    let (code, local_count) =
        gen_body(&mut module.constants, &fn_table, &params, &stmt_refs, false, &name)?;
    module.functions[fn_idx].code = FunctionCode::Compiled(code);
    module.functions[fn_idx].local_count = local_count;
    Ok(())
}

struct FnCompiler<'a> {
    constants: &'a mut ConstantPool,
    fn_table: &'a FxHashMap<String, (u32, u8)>,
    locals: Vec<String>,
    writer: BytecodeWriter,
    is_main: bool,
    fn_name: &'a str,
}

fn gen_body(
    constants: &mut ConstantPool,
    fn_table: &FxHashMap<String, (u32, u8)>,
    params: &[String],
    stmts: &[&Stmt],
    is_main: bool,
    fn_name: &str,
) -> Result<(Vec<u8>, u16), CompileError> {
    let mut gen = FnCompiler {
        constants,
        fn_table,
        locals: params.to_vec(),
        writer: BytecodeWriter::new(),
        is_main,
        fn_name,
    };

    for stmt in stmts {
        gen.emit_stmt(stmt)?;
    }

    // Implicit `return null` at the end of every body
    gen.writer.emit_u8(Opcode::ConstNull as u8);
    gen.writer.emit_u8(Opcode::Return as u8);

    let local_count = gen.locals.len() as u16;
    Ok((gen.writer.into_bytes(), local_count))
}

impl FnCompiler<'_> {
    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Let { name, value } => {
                self.emit_expr(value)?;
                if self.is_main {
                    let idx = self.constants.intern(name);
                    self.writer.emit_u8(Opcode::StoreGlobal as u8);
                    self.writer.emit_u32(idx);
                } else {
                    let slot = self.local_slot(name)?;
                    self.writer.emit_u8(Opcode::StoreLocal as u8);
                    self.writer.emit_u16(slot);
                }
                Ok(())
            }
            Stmt::Return(value) => {
                match value {
                    Some(expr) => self.emit_expr(expr)?,
                    None => self.writer.emit_u8(Opcode::ConstNull as u8),
                }
                self.writer.emit_u8(Opcode::Return as u8);
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.emit_expr(expr)?;
                self.writer.emit_u8(Opcode::Pop as u8);
                Ok(())
            }
            // The parser only allows these at the top level, where the caller
            // has already split them out.
            Stmt::Fn { .. } => Ok(()),
        }
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Int(value) => {
                self.writer.emit_u8(Opcode::ConstInt as u8);
                self.writer.emit_i64(*value);
                Ok(())
            }
            Expr::Str(value) => {
                let idx = self.constants.intern(value);
                self.writer.emit_u8(Opcode::ConstStr as u8);
                self.writer.emit_u32(idx);
                Ok(())
            }
            Expr::Ident(name) => {
                if !self.is_main {
                    if let Some(slot) = self.locals.iter().position(|l| l == name) {
                        self.writer.emit_u8(Opcode::LoadLocal as u8);
                        self.writer.emit_u16(slot as u16);
                        return Ok(());
                    }
                }
                let idx = self.constants.intern(name);
                self.writer.emit_u8(Opcode::LoadGlobal as u8);
                self.writer.emit_u32(idx);
                Ok(())
            }
            Expr::Binary { op, lhs, rhs } => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                let opcode = match op {
                    BinaryOp::Add => Opcode::Add,
                    BinaryOp::Sub => Opcode::Sub,
                    BinaryOp::Mul => Opcode::Mul,
                    BinaryOp::Div => Opcode::Div,
                };
                self.writer.emit_u8(opcode as u8);
                Ok(())
            }
            Expr::Call { callee, args } => {
                if args.len() > u8::MAX as usize {
                    return Err(CompileError::TooManyArgs(callee.clone()));
                }
                if let Some(&(idx, arity)) = self.fn_table.get(callee) {
                    if args.len() != arity as usize {
                        return Err(CompileError::ArityMismatch {
                            name: callee.clone(),
                            expected: arity,
                            got: args.len(),
                        });
                    }
                    for arg in args {
                        self.emit_expr(arg)?;
                    }
                    self.writer.emit_u8(Opcode::Call as u8);
                    self.writer.emit_u32(idx);
                    self.writer.emit_u8(args.len() as u8);
                } else {
                    for arg in args {
                        self.emit_expr(arg)?;
                    }
                    let name_idx = self.constants.intern(callee);
                    self.writer.emit_u8(Opcode::CallNative as u8);
                    self.writer.emit_u32(name_idx);
                    self.writer.emit_u8(args.len() as u8);
                }
                Ok(())
            }
        }
    }

    fn local_slot(&mut self, name: &str) -> Result<u16, CompileError> {
        if let Some(slot) = self.locals.iter().position(|l| l == name) {
            return Ok(slot as u16);
        }
        if self.locals.len() >= u16::MAX as usize {
            return Err(CompileError::TooManyLocals(self.fn_name.to_string()));
        }
        self.locals.push(name.to_string());
        Ok((self.locals.len() - 1) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::FunctionCode;

    #[test]
    fn test_eager_compiles_all_bodies() {
        let config = EngineConfig::cache_flags();
        let module = compile("fn f(x) { return x; } f(1);", &config, "m", None).unwrap();
        assert!(module.is_fully_compiled());
        assert_eq!(module.functions.len(), 2);
        assert!(module.flags & flags::EAGER != 0);
        assert!(module.flags & flags::DETERMINISTIC != 0);
    }

    #[test]
    fn test_lazy_defers_function_bodies() {
        let config = EngineConfig::default();
        let module = compile("fn f(x) { return x; } f(1);", &config, "m", None).unwrap();
        assert!(module.functions[0].code.is_compiled());
        assert!(matches!(module.functions[1].code, FunctionCode::Deferred));
        assert!(module.functions[1].span.is_some());
    }

    #[test]
    fn test_deterministic_zeroes_timestamp() {
        let module =
            compile("let x = 1;", &EngineConfig::cache_flags(), "m", None).unwrap();
        assert_eq!(module.metadata.compiled_at, 0);
    }

    #[test]
    fn test_arity_checked_at_compile_time() {
        let config = EngineConfig::cache_flags();
        let err = compile("fn f(x) { return x; } f(1, 2);", &config, "m", None).unwrap_err();
        assert!(matches!(err, CompileError::ArityMismatch { expected: 1, got: 2, .. }));
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let config = EngineConfig::default();
        let err = compile("fn f() { } fn f() { }", &config, "m", None).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateFunction(name) if name == "f"));
    }

    #[test]
    fn test_compile_deferred_body_in_place() {
        let source = "fn double(x) { return x * 2; }";
        let config = EngineConfig::default();
        let mut module = compile(source, &config, "m", None).unwrap();
        assert!(!module.is_fully_compiled());

        compile_deferred_body(&mut module, 1, source).unwrap();
        assert!(module.is_fully_compiled());
    }
}
