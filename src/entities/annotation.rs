//! Typed key/value annotations.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// A key/value tag attached to an entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Annotation<V> {
    pub key: String,
    pub value: V,
}

impl<V> Annotation<V> {
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

pub type StringAnnotation = Annotation<String>;
pub type NumericAnnotation = Annotation<u64>;

/// Build a string annotation from anything string-like.
pub fn string(key: impl Into<String>, value: impl Into<String>) -> StringAnnotation {
    Annotation::new(key, value.into())
}

/// Build a numeric annotation.
pub fn numeric(key: impl Into<String>, value: u64) -> NumericAnnotation {
    Annotation::new(key, value)
}

/// First value under `key`. Later duplicates are shadowed.
pub fn find<'a, V>(annotations: &'a [Annotation<V>], key: &str) -> Option<&'a V> {
    annotations.iter().find(|a| a.key == key).map(|a| &a.value)
}

/// Annotation keys must be usable as query identifiers:
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn validate_keys<V>(annotations: &[Annotation<V>]) -> Result<()> {
    for annotation in annotations {
        if !is_valid_key(&annotation.key) {
            return Err(StoreError::Validation(format!(
                "invalid annotation key {:?}",
                annotation.key
            )));
        }
    }
    Ok(())
}
