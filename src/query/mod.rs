//! Annotation query language.
//!
//! Predicates compare annotation keys to literals. A quoted literal is
//! matched against string annotations, an unquoted integer against numeric
//! annotations:
//!
//! ```ignore
//! let query = Query::parse(r#"type = "vote" && proposalId = "p-1" && weight = 1"#)?;
//! let keys = evaluate(query.predicate(), store_entities);
//! ```
//!
//! Malformed input is a `QuerySyntax` error that names the offending
//! fragment. An empty predicate is malformed, never "match everything".

mod eval;
mod lexer;
mod parser;

pub use eval::evaluate;
pub use parser::{Atom, Literal, Operator, Predicate};

use crate::error::{Result, StoreError};
use std::fmt;

/// Characters of source text quoted in syntax errors.
const FRAGMENT_LEN: usize = 24;

/// A parsed predicate together with its source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    source: String,
    predicate: Predicate,
}

impl Query {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lexer::tokenize(source)?;
        let predicate = parser::Parser::new(source, tokens).parse()?;
        Ok(Self {
            source: source.to_string(),
            predicate,
        })
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

pub(crate) fn syntax_error(source: &str, offset: usize, message: &str) -> StoreError {
    let fragment: String = source
        .get(offset..)
        .unwrap_or_default()
        .chars()
        .take(FRAGMENT_LEN)
        .collect();
    StoreError::QuerySyntax {
        fragment: fragment.trim_end().to_string(),
        offset,
        message: message.to_string(),
    }
}
