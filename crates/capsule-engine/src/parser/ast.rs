//! AST definitions for Capsule scripts

use crate::bytecode::SourceSpan;

/// A parsed program: a flat list of top-level statements
#[derive(Debug, Clone)]
pub struct Program {
    /// Top-level statements, in source order
    pub stmts: Vec<Stmt>,
}

/// Statement node
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `let name = value;`
    Let {
        /// Variable name
        name: String,
        /// Initializer expression
        value: Expr,
    },
    /// `fn name(params) { body }` — top level only
    Fn {
        /// Function name
        name: String,
        /// Parameter names
        params: Vec<String>,
        /// Byte range of the body text between the braces
        body_span: SourceSpan,
        /// Parsed body statements
        body: Vec<Stmt>,
    },
    /// `return;` or `return expr;`
    Return(Option<Expr>),
    /// Expression statement
    Expr(Expr),
}

/// Expression node
#[derive(Debug, Clone)]
pub enum Expr {
    /// Integer literal
    Int(i64),
    /// String literal
    Str(String),
    /// Variable reference
    Ident(String),
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Function or native call
    Call {
        /// Callee name
        callee: String,
        /// Argument expressions
        args: Vec<Expr>,
    },
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}
