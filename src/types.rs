//! Core types shared by every component.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Result, StoreError};

/// Backend-assigned entity identifier (SHA-256, shown as `0x`-prefixed hex).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(pub [u8; 32]);

impl EntityKey {
    /// Derive a key by hashing arbitrary bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        EntityKey(hasher.finalize().into())
    }

    /// Convert to `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(EntityKey(arr))
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({}...)", &self.to_hex()[..10])
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Block height. The time base for expiration.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// Height `blocks` after this one.
    pub fn plus(self, blocks: u64) -> Result<Self> {
        self.0
            .checked_add(blocks)
            .map(BlockNumber)
            .ok_or_else(|| StoreError::Validation(format!("block height overflow: {} + {}", self.0, blocks)))
    }
}

impl fmt::Debug for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({})", self.0)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account address of an entity owner. Stored lowercase so comparison is
/// case-insensitive.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerAddress(String);

impl OwnerAddress {
    /// Parse a `0x`-prefixed, 20-byte hex address.
    pub fn parse(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| StoreError::Validation(format!("owner address must start with 0x: {s}")))?;
        let bytes = hex::decode(digits)
            .map_err(|e| StoreError::Validation(format!("owner address {s}: {e}")))?;
        if bytes.len() != 20 {
            return Err(StoreError::Validation(format!(
                "owner address must be 20 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(OwnerAddress(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OwnerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owner({})", self.0)
    }
}

impl fmt::Display for OwnerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signing identity supplied by the credential provider. The client only
/// needs the owner address it acts as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountIdentity {
    address: OwnerAddress,
}

impl AccountIdentity {
    pub fn new(address: OwnerAddress) -> Self {
        Self { address }
    }

    pub fn from_address(s: &str) -> Result<Self> {
        Ok(Self::new(OwnerAddress::parse(s)?))
    }

    pub fn owner_address(&self) -> &OwnerAddress {
        &self.address
    }
}

/// Receipt for a created entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReceipt {
    pub entity_key: EntityKey,
    pub expiration_block: BlockNumber,
}

/// Receipt for a replaced entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReceipt {
    pub entity_key: EntityKey,
    pub expiration_block: BlockNumber,
}

/// Receipt for an explicitly deleted entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReceipt {
    pub entity_key: EntityKey,
}

/// Request to push an entity's expiration further out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendRequest {
    pub entity_key: EntityKey,
    pub number_of_blocks: u64,
}

impl ExtendRequest {
    pub fn new(entity_key: EntityKey, number_of_blocks: u64) -> Self {
        Self {
            entity_key,
            number_of_blocks,
        }
    }
}

/// Receipt for an extension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendReceipt {
    pub entity_key: EntityKey,
    pub old_expiration_block: BlockNumber,
    pub new_expiration_block: BlockNumber,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_hex_roundtrip() {
        let key = EntityKey::from_bytes(b"hello world");
        let hex = key.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(EntityKey::from_hex(&hex).unwrap(), key);
        assert_eq!(EntityKey::from_hex(&hex[2..]).unwrap(), key);
    }

    #[test]
    fn test_entity_key_rejects_short_hex() {
        assert!(EntityKey::from_hex("0xabcd").is_err());
    }

    #[test]
    fn test_block_arithmetic() {
        assert_eq!(BlockNumber(100).plus(25).unwrap(), BlockNumber(125));
        assert!(BlockNumber(u64::MAX).plus(1).is_err());
    }

    #[test]
    fn test_owner_address_is_case_insensitive() {
        let upper = OwnerAddress::parse("0xABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
        let lower = OwnerAddress::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_owner_address_validation() {
        assert!(OwnerAddress::parse("abcdef").is_err());
        assert!(OwnerAddress::parse("0x1234").is_err());
        assert!(OwnerAddress::parse("0xzz").is_err());
    }
}
