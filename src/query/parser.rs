//! Recursive-descent parser producing a [`Predicate`] tree.
//!
//! ```text
//! expr    := and ( "||" and )*
//! and     := primary ( "&&" primary )*
//! primary := "(" expr ")" | atom
//! atom    := IDENT "=" ( STRING | NUMBER )
//! ```

use super::lexer::{Token, TokenKind};
use super::syntax_error;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operator. Only equality is accepted by the grammar today.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
}

/// Right-hand side of an atom. The literal's syntax selects the annotation
/// namespace it is compared against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Numeric(u64),
}

/// `key <op> literal`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    pub key: String,
    pub op: Operator,
    pub literal: Literal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    Atom(Atom),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

pub(super) struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub(super) fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    /// Parse the whole token stream. Trailing tokens are an error.
    pub(super) fn parse(mut self) -> Result<Predicate> {
        if self.tokens.is_empty() {
            return Err(syntax_error(self.source, 0, "empty predicate"));
        }
        let predicate = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(syntax_error(self.source, token.offset, "unexpected trailing input"));
        }
        Ok(predicate)
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut terms = vec![self.parse_and()?];
        while self.eat(&TokenKind::Or) {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut terms = vec![self.parse_primary()?];
        while self.eat(&TokenKind::And) {
            terms.push(self.parse_primary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::And(terms)
        })
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        let open = self.offset();
        if self.eat(&TokenKind::LParen) {
            let inner = self.parse_or()?;
            if !self.eat(&TokenKind::RParen) {
                return Err(syntax_error(self.source, open, "unclosed `(`"));
            }
            return Ok(inner);
        }
        self.parse_atom().map(Predicate::Atom)
    }

    fn parse_atom(&mut self) -> Result<Atom> {
        let offset = self.offset();
        let key = match self.advance() {
            Some(TokenKind::Ident(name)) => name,
            Some(_) => return Err(syntax_error(self.source, offset, "expected annotation key")),
            None => return Err(self.unexpected_end("expected annotation key")),
        };

        let offset = self.offset();
        match self.advance() {
            Some(TokenKind::Eq) => {}
            Some(_) => return Err(syntax_error(self.source, offset, "expected `=`")),
            None => return Err(self.unexpected_end("expected `=`")),
        }

        let offset = self.offset();
        let literal = match self.advance() {
            Some(TokenKind::Str(value)) => Literal::String(value),
            Some(TokenKind::Number(value)) => Literal::Numeric(value),
            Some(TokenKind::Ident(_)) => {
                return Err(syntax_error(
                    self.source,
                    offset,
                    "string literals must be double-quoted",
                ))
            }
            Some(_) => return Err(syntax_error(self.source, offset, "expected a literal")),
            None => return Err(self.unexpected_end("expected a literal")),
        };

        Ok(Atom {
            key,
            op: Operator::Eq,
            literal,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.source.len())
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.pos)?.kind.clone();
        self.pos += 1;
        Some(token)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected_end(&self, message: &str) -> crate::error::StoreError {
        // Point at the last token so the fragment is never empty.
        let offset = self.tokens.last().map(|t| t.offset).unwrap_or(0);
        syntax_error(self.source, offset, &format!("unexpected end of predicate, {message}"))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Literal::Numeric(n) => write!(f, "{n}"),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Atom(atom) => write!(f, "{} = {}", atom.key, atom.literal),
            Predicate::And(terms) => write_joined(f, terms, " && "),
            Predicate::Or(terms) => write_joined(f, terms, " || "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[Predicate], sep: &str) -> fmt::Result {
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match term {
            Predicate::Atom(_) => write!(f, "{term}")?,
            _ => write!(f, "({term})")?,
        }
    }
    Ok(())
}
