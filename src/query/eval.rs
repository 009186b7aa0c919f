//! Predicate evaluation over entities.

use super::parser::{Atom, Literal, Operator, Predicate};
use crate::entities::Entity;
use crate::types::EntityKey;

impl Atom {
    /// String literals look only at string annotations, numeric literals
    /// only at numeric ones. Unknown keys do not match.
    pub fn matches(&self, entity: &Entity) -> bool {
        match (&self.op, &self.literal) {
            (Operator::Eq, Literal::String(expected)) => {
                entity.string_annotation(&self.key) == Some(expected.as_str())
            }
            (Operator::Eq, Literal::Numeric(expected)) => {
                entity.numeric_annotation(&self.key) == Some(*expected)
            }
        }
    }
}

impl Predicate {
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Predicate::Atom(atom) => atom.matches(entity),
            Predicate::And(terms) => terms.iter().all(|t| t.matches(entity)),
            Predicate::Or(terms) => terms.iter().any(|t| t.matches(entity)),
        }
    }
}

/// Keys of matching entities, in the order the entities were supplied.
pub fn evaluate<'a, I>(predicate: &Predicate, entities: I) -> Vec<EntityKey>
where
    I: IntoIterator<Item = &'a Entity>,
{
    entities
        .into_iter()
        .filter(|entity| predicate.matches(entity))
        .map(|entity| entity.key)
        .collect()
}
