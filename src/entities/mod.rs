//! Entity model: opaque payload, typed annotations and expiration metadata.

pub mod annotation;
mod kind;

pub use annotation::{Annotation, NumericAnnotation, StringAnnotation};
pub use kind::{EntityKind, GenericEntity, ProposalEntity, VoteEntity, KIND_ANNOTATION};

use crate::error::{Result, StoreError};
use crate::types::{BlockNumber, EntityKey, OwnerAddress};
use serde::{Deserialize, Serialize};

/// A stored entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Assigned by the backend, never reused.
    pub key: EntityKey,
    pub payload: Vec<u8>,
    pub string_annotations: Vec<StringAnnotation>,
    pub numeric_annotations: Vec<NumericAnnotation>,
    pub owner: OwnerAddress,
    /// First block at which the entity is no longer live.
    pub expires_at_block: BlockNumber,
}

impl Entity {
    /// Everything except the payload.
    pub fn metadata(&self) -> EntityMetadata {
        EntityMetadata {
            owner: self.owner.clone(),
            expires_at_block: self.expires_at_block,
            string_annotations: self.string_annotations.clone(),
            numeric_annotations: self.numeric_annotations.clone(),
            payload_size: self.payload.len(),
        }
    }

    pub fn string_annotation(&self, key: &str) -> Option<&str> {
        annotation::find(&self.string_annotations, key).map(String::as_str)
    }

    pub fn numeric_annotation(&self, key: &str) -> Option<u64> {
        annotation::find(&self.numeric_annotations, key).copied()
    }
}

/// Entity metadata as returned by `get_entity_metadata`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub owner: OwnerAddress,
    pub expires_at_block: BlockNumber,
    pub string_annotations: Vec<StringAnnotation>,
    pub numeric_annotations: Vec<NumericAnnotation>,
    pub payload_size: usize,
}

impl EntityMetadata {
    pub fn string_annotation(&self, key: &str) -> Option<&str> {
        annotation::find(&self.string_annotations, key).map(String::as_str)
    }

    pub fn numeric_annotation(&self, key: &str) -> Option<u64> {
        annotation::find(&self.numeric_annotations, key).copied()
    }
}

/// Input for creating an entity (before a key is assigned).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCreate {
    pub data: Vec<u8>,
    /// Blocks-to-live, counted from the block the entity is created in.
    pub btl: u64,
    pub string_annotations: Vec<StringAnnotation>,
    pub numeric_annotations: Vec<NumericAnnotation>,
}

impl EntityCreate {
    pub fn new(data: impl Into<Vec<u8>>, btl: u64) -> Self {
        Self {
            data: data.into(),
            btl,
            string_annotations: Vec::new(),
            numeric_annotations: Vec::new(),
        }
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_annotations.push(annotation::string(key, value));
        self
    }

    pub fn with_numeric(mut self, key: impl Into<String>, value: u64) -> Self {
        self.numeric_annotations.push(annotation::numeric(key, value));
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_btl(self.btl)?;
        annotation::validate_keys(&self.string_annotations)?;
        annotation::validate_keys(&self.numeric_annotations)
    }
}

/// Full replacement of an existing entity's payload and annotations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub entity_key: EntityKey,
    pub data: Vec<u8>,
    /// New blocks-to-live, counted from the block of the update.
    pub btl: u64,
    pub string_annotations: Vec<StringAnnotation>,
    pub numeric_annotations: Vec<NumericAnnotation>,
}

impl EntityUpdate {
    pub fn new(entity_key: EntityKey, data: impl Into<Vec<u8>>, btl: u64) -> Self {
        Self {
            entity_key,
            data: data.into(),
            btl,
            string_annotations: Vec::new(),
            numeric_annotations: Vec::new(),
        }
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_annotations.push(annotation::string(key, value));
        self
    }

    pub fn with_numeric(mut self, key: impl Into<String>, value: u64) -> Self {
        self.numeric_annotations.push(annotation::numeric(key, value));
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_btl(self.btl)?;
        annotation::validate_keys(&self.string_annotations)?;
        annotation::validate_keys(&self.numeric_annotations)
    }
}

pub(crate) fn validate_btl(btl: u64) -> Result<()> {
    if btl == 0 {
        return Err(StoreError::Validation("btl must be a positive number of blocks".into()));
    }
    Ok(())
}
