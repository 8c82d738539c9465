//! Capsule VM: value model and bytecode interpreter
//!
//! Single-threaded, synchronous. The interpreter drives the lazy-compile
//! path: calling a deferred function triggers a reparse from the unit's
//! source, which fails fast when the unit is sourceless.

pub mod defaults;
pub mod natives;

pub use natives::{NativeCtx, NativeFn, NativeRegistry};

use crate::bytecode::{DecodeError, FunctionCode, Opcode};
use crate::unit::{CompiledUnit, ReparseError};
use rustc_hash::FxHashMap;
use std::fmt;
use std::io::Write;
use thiserror::Error;

/// Maximum function call depth
pub const MAX_CALL_DEPTH: usize = 256;

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value
    Null,
    /// 64-bit integer
    Int(i64),
    /// UTF-8 string
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Runtime errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Malformed bytecode
    #[error("Bytecode error: {0}")]
    Decode(#[from] DecodeError),

    /// Lazy recompilation failed
    #[error(transparent)]
    Reparse(#[from] ReparseError),

    /// Operand types do not fit the operation
    #[error("Type mismatch in '{op}'")]
    TypeMismatch {
        /// Operation name
        op: &'static str,
    },

    /// Integer division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Call to an unregistered native
    #[error("Unknown native function: {0}")]
    UnknownNative(String),

    /// Read of a global that was never stored
    #[error("Undefined global: {0}")]
    UndefinedGlobal(String),

    /// Function index out of range
    #[error("Invalid function index: {0}")]
    InvalidFunction(u32),

    /// Constant pool index out of range
    #[error("Invalid constant index: {0}")]
    InvalidConstant(u32),

    /// Operand stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Call depth limit exceeded
    #[error("Maximum call depth ({MAX_CALL_DEPTH}) exceeded")]
    CallDepthExceeded,

    /// Error reported by a native handler
    #[error("Native error: {0}")]
    Native(String),
}

/// The Capsule virtual machine
#[derive(Debug, Default)]
pub struct Vm {
    /// Global variables by name
    pub globals: FxHashMap<String, Value>,
    process_args: Vec<String>,
}

impl Vm {
    /// Create a VM with no process arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a VM exposing the given process argument list to scripts
    pub fn with_args(process_args: Vec<String>) -> Self {
        Self {
            globals: FxHashMap::default(),
            process_args,
        }
    }

    /// Predefine a global before execution
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Execute a unit's top-level body
    pub fn execute(
        &mut self,
        unit: &mut CompiledUnit,
        natives: &NativeRegistry,
        output: &mut dyn Write,
    ) -> Result<Value, VmError> {
        self.call_function(unit, 0, Vec::new(), natives, output, 0)
    }

    fn call_function(
        &mut self,
        unit: &mut CompiledUnit,
        fn_idx: usize,
        args: Vec<Value>,
        natives: &NativeRegistry,
        output: &mut dyn Write,
        depth: usize,
    ) -> Result<Value, VmError> {
        if depth >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepthExceeded);
        }
        if fn_idx >= unit.module.functions.len() {
            return Err(VmError::InvalidFunction(fn_idx as u32));
        }

        // Lazy path: compile the deferred body before entering it.
        if matches!(unit.module.functions[fn_idx].code, FunctionCode::Deferred) {
            unit.reparse_function(fn_idx)?;
        }

        let (code, local_count) = {
            let func = &unit.module.functions[fn_idx];
            let code = match &func.code {
                FunctionCode::Compiled(code) => code.clone(),
                FunctionCode::Deferred => unreachable!("reparsed above"),
            };
            (code, func.local_count as usize)
        };

        let mut locals = args;
        locals.resize(local_count.max(locals.len()), Value::Null);
        let mut stack: Vec<Value> = Vec::new();
        let mut ip = 0usize;

        macro_rules! pop {
            () => {
                stack.pop().ok_or(VmError::StackUnderflow)?
            };
        }

        loop {
            let byte = *code.get(ip).ok_or(DecodeError::UnexpectedEof {
                wanted: 1,
                offset: ip,
                available: 0,
            })?;
            ip += 1;
            let opcode = Opcode::from_byte(byte).ok_or(DecodeError::InvalidOpcode(byte))?;

            match opcode {
                Opcode::Nop => {}
                Opcode::Pop => {
                    pop!();
                }
                Opcode::ConstNull => stack.push(Value::Null),
                Opcode::ConstInt => {
                    let value = read_i64(&code, &mut ip)?;
                    stack.push(Value::Int(value));
                }
                Opcode::ConstStr => {
                    let idx = read_u32(&code, &mut ip)?;
                    let value = unit
                        .module
                        .constants
                        .get(idx)
                        .ok_or(VmError::InvalidConstant(idx))?
                        .to_string();
                    stack.push(Value::Str(value));
                }
                Opcode::LoadLocal => {
                    let slot = read_u16(&code, &mut ip)? as usize;
                    let value = locals.get(slot).cloned().unwrap_or(Value::Null);
                    stack.push(value);
                }
                Opcode::StoreLocal => {
                    let slot = read_u16(&code, &mut ip)? as usize;
                    let value = pop!();
                    if slot >= locals.len() {
                        locals.resize(slot + 1, Value::Null);
                    }
                    locals[slot] = value;
                }
                Opcode::LoadGlobal => {
                    let idx = read_u32(&code, &mut ip)?;
                    let name = unit
                        .module
                        .constants
                        .get(idx)
                        .ok_or(VmError::InvalidConstant(idx))?;
                    let value = self
                        .globals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| VmError::UndefinedGlobal(name.to_string()))?;
                    stack.push(value);
                }
                Opcode::StoreGlobal => {
                    let idx = read_u32(&code, &mut ip)?;
                    let name = unit
                        .module
                        .constants
                        .get(idx)
                        .ok_or(VmError::InvalidConstant(idx))?
                        .to_string();
                    let value = pop!();
                    self.globals.insert(name, value);
                }
                Opcode::Add => {
                    let rhs = pop!();
                    let lhs = pop!();
                    let result = match (lhs, rhs) {
                        (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(b)),
                        (Value::Str(a), b) => Value::Str(format!("{}{}", a, b)),
                        (a, Value::Str(b)) => Value::Str(format!("{}{}", a, b)),
                        _ => return Err(VmError::TypeMismatch { op: "+" }),
                    };
                    stack.push(result);
                }
                Opcode::Sub => {
                    let (a, b) = pop_ints(&mut stack, "-")?;
                    stack.push(Value::Int(a.wrapping_sub(b)));
                }
                Opcode::Mul => {
                    let (a, b) = pop_ints(&mut stack, "*")?;
                    stack.push(Value::Int(a.wrapping_mul(b)));
                }
                Opcode::Div => {
                    let (a, b) = pop_ints(&mut stack, "/")?;
                    if b == 0 {
                        return Err(VmError::DivisionByZero);
                    }
                    stack.push(Value::Int(a.wrapping_div(b)));
                }
                Opcode::Call => {
                    let callee = read_u32(&code, &mut ip)? as usize;
                    let argc = read_u8(&code, &mut ip)? as usize;
                    let mut call_args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        call_args.push(pop!());
                    }
                    call_args.reverse();
                    let result =
                        self.call_function(unit, callee, call_args, natives, output, depth + 1)?;
                    stack.push(result);
                }
                Opcode::CallNative => {
                    let idx = read_u32(&code, &mut ip)?;
                    let name = unit
                        .module
                        .constants
                        .get(idx)
                        .ok_or(VmError::InvalidConstant(idx))?
                        .to_string();
                    let argc = read_u8(&code, &mut ip)? as usize;
                    let mut call_args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        call_args.push(pop!());
                    }
                    call_args.reverse();

                    let handler = natives
                        .get(&name)
                        .ok_or_else(|| VmError::UnknownNative(name.clone()))?;
                    let mut ctx = NativeCtx {
                        output: &mut *output,
                        globals: &self.globals,
                        process_args: &self.process_args,
                    };
                    let result = handler(&mut ctx, &call_args)?;
                    stack.push(result);
                }
                Opcode::Return => {
                    return Ok(pop!());
                }
            }
        }
    }
}

fn pop_ints(stack: &mut Vec<Value>, op: &'static str) -> Result<(i64, i64), VmError> {
    let rhs = stack.pop().ok_or(VmError::StackUnderflow)?;
    let lhs = stack.pop().ok_or(VmError::StackUnderflow)?;
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok((a, b)),
        _ => Err(VmError::TypeMismatch { op }),
    }
}

fn read_u8(code: &[u8], ip: &mut usize) -> Result<u8, VmError> {
    let byte = *code.get(*ip).ok_or(DecodeError::UnexpectedEof {
        wanted: 1,
        offset: *ip,
        available: 0,
    })?;
    *ip += 1;
    Ok(byte)
}

fn read_u16(code: &[u8], ip: &mut usize) -> Result<u16, VmError> {
    let bytes = code.get(*ip..*ip + 2).ok_or(DecodeError::UnexpectedEof {
        wanted: 2,
        offset: *ip,
        available: code.len().saturating_sub(*ip),
    })?;
    *ip += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(code: &[u8], ip: &mut usize) -> Result<u32, VmError> {
    let bytes = code.get(*ip..*ip + 4).ok_or(DecodeError::UnexpectedEof {
        wanted: 4,
        offset: *ip,
        available: code.len().saturating_sub(*ip),
    })?;
    *ip += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i64(code: &[u8], ip: &mut usize) -> Result<i64, VmError> {
    let bytes = code.get(*ip..*ip + 8).ok_or(DecodeError::UnexpectedEof {
        wanted: 8,
        offset: *ip,
        available: code.len().saturating_sub(*ip),
    })?;
    *ip += 8;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}
