//! Typed views of entities, discriminated by their `type` annotation.

use super::EntityMetadata;
use crate::error::{Result, StoreError};
use crate::types::OwnerAddress;
use serde::{Deserialize, Serialize};

/// String annotation that names an entity's kind.
pub const KIND_ANNOTATION: &str = "type";

/// A voting proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalEntity {
    pub proposal_id: String,
    pub status: Option<String>,
    pub version: Option<u64>,
}

/// A single vote on a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEntity {
    pub proposal_id: String,
    pub voter: String,
    pub choice: String,
    /// Defaults to 1 when the entity carries no `weight`.
    pub weight: u64,
}

/// Any entity without a recognised kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericEntity {
    pub owner: OwnerAddress,
    pub kind: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    Proposal(ProposalEntity),
    Vote(VoteEntity),
    Generic(GenericEntity),
}

impl EntityKind {
    /// Decode the kind from metadata. Known kinds with missing fields are
    /// rejected rather than falling back to `Generic`.
    pub fn decode(metadata: &EntityMetadata) -> Result<Self> {
        match metadata.string_annotation(KIND_ANNOTATION) {
            Some("proposal") => Ok(EntityKind::Proposal(ProposalEntity {
                proposal_id: required(metadata, "proposal", "proposalId")?,
                status: metadata.string_annotation("status").map(str::to_string),
                version: metadata.numeric_annotation("version"),
            })),
            Some("vote") => Ok(EntityKind::Vote(VoteEntity {
                proposal_id: required(metadata, "vote", "proposalId")?,
                voter: required(metadata, "vote", "voter")?,
                choice: required(metadata, "vote", "choice")?,
                weight: metadata.numeric_annotation("weight").unwrap_or(1),
            })),
            other => Ok(EntityKind::Generic(GenericEntity {
                owner: metadata.owner.clone(),
                kind: other.map(str::to_string),
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Proposal(_) => "proposal",
            EntityKind::Vote(_) => "vote",
            EntityKind::Generic(_) => "generic",
        }
    }
}

fn required(metadata: &EntityMetadata, kind: &str, key: &str) -> Result<String> {
    metadata
        .string_annotation(key)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Validation(format!("{kind} entity is missing `{key}` annotation")))
}
