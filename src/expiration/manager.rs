//! Expiration bookkeeping.

use crate::entities::validate_btl;
use crate::error::{Result, StoreError};
use crate::types::{BlockNumber, EntityKey};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Result of a successful extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extension {
    pub old_expiration: BlockNumber,
    pub new_expiration: BlockNumber,
}

/// True once `at` has reached `expires_at`.
pub fn is_expired_at(expires_at: BlockNumber, at: BlockNumber) -> bool {
    expires_at <= at
}

/// Tracks each entity's expiration block against the advancing chain head.
///
/// Expiry is never polled. It is observed lazily through [`is_live`] and
/// realised in bulk by [`advance_to`], which hands back the keys whose
/// time ran out so the caller can emit deletions.
///
/// [`is_live`]: ExpirationManager::is_live
/// [`advance_to`]: ExpirationManager::advance_to
pub struct ExpirationManager {
    current: BlockNumber,
    expirations: HashMap<EntityKey, BlockNumber>,
    /// Expiration block -> keys expiring there, in registration order.
    schedule: BTreeMap<BlockNumber, Vec<EntityKey>>,
}

impl ExpirationManager {
    pub fn new(current: BlockNumber) -> Self {
        Self {
            current,
            expirations: HashMap::new(),
            schedule: BTreeMap::new(),
        }
    }

    pub fn current_block(&self) -> BlockNumber {
        self.current
    }

    /// Start tracking `key`, expiring `btl` blocks from now.
    pub fn create(&mut self, key: EntityKey, btl: u64) -> Result<BlockNumber> {
        validate_btl(btl)?;
        if self.expirations.contains_key(&key) {
            return Err(StoreError::Validation(format!("entity key {key} is already in use")));
        }
        let expires_at = self.current.plus(btl)?;
        self.insert(key, expires_at);
        Ok(expires_at)
    }

    /// Push expiration `blocks` further out.
    pub fn extend(&mut self, key: &EntityKey, blocks: u64) -> Result<Extension> {
        if blocks == 0 {
            return Err(StoreError::Validation(
                "number of blocks to extend by must be positive".into(),
            ));
        }
        let old_expiration = self.live_expiration(key)?;
        let new_expiration = old_expiration.plus(blocks)?;
        self.unschedule(key, old_expiration);
        self.insert(*key, new_expiration);
        Ok(Extension {
            old_expiration,
            new_expiration,
        })
    }

    /// Restart the countdown at `btl` blocks from now (full replacement).
    pub fn reset(&mut self, key: &EntityKey, btl: u64) -> Result<BlockNumber> {
        validate_btl(btl)?;
        let old_expiration = self.live_expiration(key)?;
        let expires_at = self.current.plus(btl)?;
        self.unschedule(key, old_expiration);
        self.insert(*key, expires_at);
        Ok(expires_at)
    }

    /// Stop tracking `key`.
    pub fn remove(&mut self, key: &EntityKey) -> Option<BlockNumber> {
        let expires_at = self.expirations.remove(key)?;
        self.unschedule(key, expires_at);
        Some(expires_at)
    }

    pub fn expires_at(&self, key: &EntityKey) -> Option<BlockNumber> {
        self.expirations.get(key).copied()
    }

    /// Unknown keys count as expired.
    pub fn is_expired(&self, key: &EntityKey, at: BlockNumber) -> bool {
        self.expires_at(key)
            .map(|expires_at| is_expired_at(expires_at, at))
            .unwrap_or(true)
    }

    pub fn is_live(&self, key: &EntityKey) -> bool {
        !self.is_expired(key, self.current)
    }

    /// Move the chain head to `block` and return every key that expired on
    /// the way, ordered by expiration block.
    pub fn advance_to(&mut self, block: BlockNumber) -> Result<Vec<EntityKey>> {
        if block < self.current {
            return Err(StoreError::Validation(format!(
                "block height cannot move backwards ({} -> {})",
                self.current, block
            )));
        }
        self.current = block;

        // Split at `block` itself so the head can reach u64::MAX.
        let mut still_live = self.schedule.split_off(&block);
        let at_head = still_live.remove(&block);
        let mut due = std::mem::replace(&mut self.schedule, still_live);
        if let Some(keys) = at_head {
            due.insert(block, keys);
        }

        let mut expired = Vec::new();
        for (_, keys) in due {
            for key in keys {
                self.expirations.remove(&key);
                expired.push(key);
            }
        }
        if !expired.is_empty() {
            debug!(block = block.0, count = expired.len(), "entities expired");
        }
        Ok(expired)
    }

    pub fn len(&self) -> usize {
        self.expirations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expirations.is_empty()
    }

    fn live_expiration(&self, key: &EntityKey) -> Result<BlockNumber> {
        match self.expires_at(key) {
            Some(expires_at) if !is_expired_at(expires_at, self.current) => Ok(expires_at),
            _ => Err(StoreError::NotFound(*key)),
        }
    }

    fn insert(&mut self, key: EntityKey, expires_at: BlockNumber) {
        self.expirations.insert(key, expires_at);
        self.schedule.entry(expires_at).or_default().push(key);
    }

    fn unschedule(&mut self, key: &EntityKey, expires_at: BlockNumber) {
        if let Some(keys) = self.schedule.get_mut(&expires_at) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.schedule.remove(&expires_at);
            }
        }
    }
}
