//! Recursive-descent parser for Capsule scripts

use super::ast::{BinaryOp, Expr, Program, Stmt};
use super::lexer::{lex, Lexeme, Token};
use crate::bytecode::SourceSpan;
use thiserror::Error;

/// Parsing errors
#[derive(Debug, Error)]
pub enum ParseError {
    /// Unexpected token
    #[error("Expected {expected}, found '{found}' at byte offset {offset}")]
    Unexpected {
        /// What the parser was looking for
        expected: &'static str,
        /// Source text of the offending token
        found: String,
        /// Byte offset of the offending token
        offset: usize,
    },

    /// Input ended mid-construct
    #[error("Unexpected end of input, expected {expected}")]
    UnexpectedEof {
        /// What the parser was looking for
        expected: &'static str,
    },

    /// `fn` declarations are only allowed at the top level
    #[error("Nested function declaration at byte offset {offset}")]
    NestedFunction {
        /// Byte offset of the nested `fn`
        offset: usize,
    },

    /// Integer literal does not fit in i64
    #[error("Integer literal out of range at byte offset {offset}")]
    IntOutOfRange {
        /// Byte offset of the literal
        offset: usize,
    },
}

/// Parse a full program
pub fn parse(source: &str) -> Result<Program, super::CompileFrontError> {
    let lexemes = lex(source)?;
    let mut parser = Parser {
        source,
        lexemes,
        pos: 0,
        in_function: false,
    };
    let stmts = parser.parse_stmts_until(None)?;
    Ok(Program { stmts })
}

/// Parse a function body fragment (no `fn` declarations allowed)
pub fn parse_body(source: &str) -> Result<Vec<Stmt>, super::CompileFrontError> {
    let lexemes = lex(source)?;
    let mut parser = Parser {
        source,
        lexemes,
        pos: 0,
        in_function: true,
    };
    Ok(parser.parse_stmts_until(None)?)
}

struct Parser<'a> {
    source: &'a str,
    lexemes: Vec<Lexeme>,
    pos: usize,
    in_function: bool,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn advance(&mut self) -> Option<Lexeme> {
        let lexeme = self.lexemes.get(self.pos).cloned();
        if lexeme.is_some() {
            self.pos += 1;
        }
        lexeme
    }

    fn text(&self, lexeme: &Lexeme) -> &'a str {
        &self.source[lexeme.span.clone()]
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<Lexeme, ParseError> {
        match self.advance() {
            Some(lexeme) if lexeme.token == token => Ok(lexeme),
            Some(lexeme) => Err(ParseError::Unexpected {
                expected,
                found: self.source[lexeme.span.clone()].to_string(),
                offset: lexeme.span.start,
            }),
            None => Err(ParseError::UnexpectedEof { expected }),
        }
    }

    fn at(&self, token: Token) -> bool {
        self.peek().map(|l| l.token == token).unwrap_or(false)
    }

    /// Parse statements until the given closing token (or end of input)
    fn parse_stmts_until(&mut self, close: Option<Token>) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            match (self.peek(), close) {
                (None, None) => return Ok(stmts),
                (None, Some(_)) => return Err(ParseError::UnexpectedEof { expected: "'}'" }),
                (Some(lexeme), Some(c)) if lexeme.token == c => return Ok(stmts),
                _ => stmts.push(self.parse_stmt()?),
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().map(|l| l.token) {
            Some(Token::Let) => self.parse_let(),
            Some(Token::Fn) => self.parse_fn(),
            Some(Token::Return) => self.parse_return(),
            _ => {
                let expr = self.parse_expr()?;
                self.expect(Token::Semi, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_let(&mut self) -> Result<Stmt, ParseError> {
        self.expect(Token::Let, "'let'")?;
        let name_lexeme = self.expect(Token::Ident, "variable name")?;
        let name = self.text(&name_lexeme).to_string();
        self.expect(Token::Eq, "'='")?;
        let value = self.parse_expr()?;
        self.expect(Token::Semi, "';'")?;
        Ok(Stmt::Let { name, value })
    }

    fn parse_fn(&mut self) -> Result<Stmt, ParseError> {
        let fn_lexeme = self.expect(Token::Fn, "'fn'")?;
        if self.in_function {
            return Err(ParseError::NestedFunction {
                offset: fn_lexeme.span.start,
            });
        }

        let name_lexeme = self.expect(Token::Ident, "function name")?;
        let name = self.text(&name_lexeme).to_string();

        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.at(Token::RParen) {
            loop {
                let param = self.expect(Token::Ident, "parameter name")?;
                params.push(self.text(&param).to_string());
                if !self.at(Token::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(Token::RParen, "')'")?;

        let lbrace = self.expect(Token::LBrace, "'{'")?;
        let body_start = lbrace.span.end;

        self.in_function = true;
        let body = self.parse_stmts_until(Some(Token::RBrace));
        self.in_function = false;
        let body = body?;

        let rbrace = self.expect(Token::RBrace, "'}'")?;
        let body_span = SourceSpan::new(body_start as u32, rbrace.span.start as u32);

        Ok(Stmt::Fn {
            name,
            params,
            body_span,
            body,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        self.expect(Token::Return, "'return'")?;
        if self.at(Token::Semi) {
            self.advance();
            return Ok(Stmt::Return(None));
        }
        let expr = self.parse_expr()?;
        self.expect(Token::Semi, "';'")?;
        Ok(Stmt::Return(Some(expr)))
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek().map(|l| l.token) {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek().map(|l| l.token) {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let lexeme = match self.advance() {
            Some(lexeme) => lexeme,
            None => return Err(ParseError::UnexpectedEof { expected: "expression" }),
        };

        match lexeme.token {
            Token::Int => {
                let text = self.text(&lexeme);
                let value: i64 = text.parse().map_err(|_| ParseError::IntOutOfRange {
                    offset: lexeme.span.start,
                })?;
                Ok(Expr::Int(value))
            }
            Token::Str => {
                let text = self.text(&lexeme);
                // Strip the surrounding quotes
                Ok(Expr::Str(text[1..text.len() - 1].to_string()))
            }
            Token::Minus => {
                let inner = self.parse_factor()?;
                Ok(Expr::Binary {
                    op: BinaryOp::Sub,
                    lhs: Box::new(Expr::Int(0)),
                    rhs: Box::new(inner),
                })
            }
            Token::LParen => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::Ident => {
                let name = self.text(&lexeme).to_string();
                if self.at(Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.at(Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.at(Token::Comma) {
                                break;
                            }
                            self.advance();
                        }
                    }
                    self.expect(Token::RParen, "')'")?;
                    Ok(Expr::Call { callee: name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            _ => Err(ParseError::Unexpected {
                expected: "expression",
                found: self.source[lexeme.span.clone()].to_string(),
                offset: lexeme.span.start,
            }),
        }
    }
}
