//! Bytecode opcodes for the Capsule VM
//!
//! All opcodes are single-byte instructions. Some opcodes take additional
//! operands that follow the opcode byte in the bytecode stream.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Variables
//! - 0x20-0x2F: Arithmetic
//! - 0xA0-0xAF: Function calls

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Push null constant
    ConstNull = 0x04,
    /// Push 64-bit integer constant (operand: i64)
    ConstInt = 0x07,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x09,

    // ===== Variables (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 index)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 index)
    StoreLocal = 0x11,
    /// Load global by name (operand: u32 pool index of name)
    LoadGlobal = 0x14,
    /// Store top of stack to global by name (operand: u32 pool index of name)
    StoreGlobal = 0x15,

    // ===== Arithmetic (0x20-0x2F) =====
    /// Add two values (int + int, or string concatenation)
    Add = 0x20,
    /// Subtract
    Sub = 0x21,
    /// Multiply
    Mul = 0x22,
    /// Divide (traps on division by zero)
    Div = 0x23,

    // ===== Function Calls (0xA0-0xAF) =====
    /// Call function by index (operands: u32 function index, u8 argc)
    Call = 0xA0,
    /// Call native handler by name (operands: u32 pool index of name, u8 argc)
    CallNative = 0xA1,
    /// Return top of stack from the current function
    Return = 0xA2,
}

impl Opcode {
    /// Decode an opcode from its byte representation
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::Nop),
            0x01 => Some(Opcode::Pop),
            0x04 => Some(Opcode::ConstNull),
            0x07 => Some(Opcode::ConstInt),
            0x09 => Some(Opcode::ConstStr),
            0x10 => Some(Opcode::LoadLocal),
            0x11 => Some(Opcode::StoreLocal),
            0x14 => Some(Opcode::LoadGlobal),
            0x15 => Some(Opcode::StoreGlobal),
            0x20 => Some(Opcode::Add),
            0x21 => Some(Opcode::Sub),
            0x22 => Some(Opcode::Mul),
            0x23 => Some(Opcode::Div),
            0xA0 => Some(Opcode::Call),
            0xA1 => Some(Opcode::CallNative),
            0xA2 => Some(Opcode::Return),
            _ => None,
        }
    }
}
