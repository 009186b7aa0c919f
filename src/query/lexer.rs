//! Tokenizer for annotation predicates.

use super::syntax_error;
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Number(u64),
    Eq,
    And,
    Or,
    LParen,
    RParen,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token's first character.
    pub offset: usize,
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                pos += 1;
                continue;
            }
            b'(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset: start });
                pos += 1;
            }
            b')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset: start });
                pos += 1;
            }
            b'=' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    return Err(syntax_error(source, start, "use `=` for equality, not `==`"));
                }
                tokens.push(Token { kind: TokenKind::Eq, offset: start });
                pos += 1;
            }
            b'&' => {
                if bytes.get(pos + 1) != Some(&b'&') {
                    return Err(syntax_error(source, start, "expected `&&`"));
                }
                tokens.push(Token { kind: TokenKind::And, offset: start });
                pos += 2;
            }
            b'|' => {
                if bytes.get(pos + 1) != Some(&b'|') {
                    return Err(syntax_error(source, start, "expected `||`"));
                }
                tokens.push(Token { kind: TokenKind::Or, offset: start });
                pos += 2;
            }
            b'!' | b'<' | b'>' => {
                let len = if bytes.get(pos + 1) == Some(&b'=') { 2 } else { 1 };
                let op = &source[start..start + len];
                return Err(syntax_error(
                    source,
                    start,
                    &format!("operator `{op}` is not supported, only `=`"),
                ));
            }
            b'"' => {
                let (value, end) = lex_string(source, start)?;
                tokens.push(Token { kind: TokenKind::Str(value), offset: start });
                pos = end;
            }
            b'0'..=b'9' => {
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                if pos < bytes.len() && (bytes[pos].is_ascii_alphabetic() || bytes[pos] == b'_') {
                    return Err(syntax_error(source, start, "malformed number"));
                }
                let value = source[start..pos]
                    .parse::<u64>()
                    .map_err(|_| syntax_error(source, start, "number out of range"))?;
                tokens.push(Token { kind: TokenKind::Number(value), offset: start });
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                    pos += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(source[start..pos].to_string()),
                    offset: start,
                });
            }
            _ => {
                return Err(syntax_error(source, start, "unexpected character"));
            }
        }
    }

    Ok(tokens)
}

/// Lex a double-quoted string starting at `start`. Returns the unescaped
/// value and the offset just past the closing quote.
fn lex_string(source: &str, start: usize) -> Result<(String, usize)> {
    let mut value = String::new();
    let mut chars = source[start + 1..].char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, start + 1 + i + 1)),
            '\\' => match chars.next() {
                Some((_, '"')) => value.push('"'),
                Some((_, '\\')) => value.push('\\'),
                Some((j, _)) => {
                    return Err(syntax_error(source, start + 1 + j - 1, "invalid escape sequence"))
                }
                None => break,
            },
            c => value.push(c),
        }
    }

    Err(syntax_error(source, start, "unterminated string literal"))
}
