//! Parser module: lexer, AST, and recursive-descent parser

pub mod ast;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;

pub use ast::{BinaryOp, Expr, Program, Stmt};
pub use lexer::{lex, LexError, Lexeme, Token};
pub use parser::{parse, parse_body, ParseError};

use thiserror::Error;

/// Combined lexing/parsing error for the compile front end
#[derive(Debug, Error)]
pub enum CompileFrontError {
    /// Lexing failed
    #[error(transparent)]
    Lex(#[from] LexError),
    /// Parsing failed
    #[error(transparent)]
    Parse(#[from] ParseError),
}
