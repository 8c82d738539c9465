//! Lexer for Capsule scripts.
//!
//! Implemented with the logos library; converts source text into a stream of
//! tokens with byte-offset spans.

use logos::Logos;
use thiserror::Error;

/// Logos-based token enum
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Keywords (must come before identifiers)
    /// `let`
    #[token("let")]
    Let,

    /// `fn`
    #[token("fn")]
    Fn,

    /// `return`
    #[token("return")]
    Return,

    // Punctuation
    /// `(`
    #[token("(")]
    LParen,

    /// `)`
    #[token(")")]
    RParen,

    /// `{`
    #[token("{")]
    LBrace,

    /// `}`
    #[token("}")]
    RBrace,

    /// `,`
    #[token(",")]
    Comma,

    /// `;`
    #[token(";")]
    Semi,

    /// `=`
    #[token("=")]
    Eq,

    /// `+`
    #[token("+")]
    Plus,

    /// `-`
    #[token("-")]
    Minus,

    /// `*`
    #[token("*")]
    Star,

    /// `/`
    #[token("/")]
    Slash,

    // Literals
    /// Integer literal
    #[regex(r"[0-9]+")]
    Int,

    /// String literal (no escapes)
    #[regex(r#""[^"\n]*""#)]
    Str,

    /// Identifier
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
}

/// Lexing error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    /// Unrecognized character sequence
    #[error("Unexpected character at byte offset {offset}")]
    UnexpectedChar {
        /// Byte offset of the bad input
        offset: usize,
    },
}

/// A token together with its source span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    /// Token kind
    pub token: Token,
    /// Byte range in the source text
    pub span: std::ops::Range<usize>,
}

/// Lex a full source string into a token vector
pub fn lex(source: &str) -> Result<Vec<Lexeme>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut out = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => out.push(Lexeme {
                token,
                span: lexer.span(),
            }),
            Err(()) => {
                return Err(LexError::UnexpectedChar {
                    offset: lexer.span().start,
                })
            }
        }
    }
    Ok(out)
}
