//! Backend transport contract.
//!
//! The client never mutates entities itself. Every create, update, delete
//! and extension goes to a [`Backend`], which is the sole arbiter of
//! conflicting writes; the client only reports what the backend confirmed.
//!
//! [`MemoryBackend`] is an in-process implementation used for tests and
//! local development.

mod memory;

pub use memory::{MemoryBackend, MemoryBackendConfig};

use crate::entities::{EntityCreate, EntityMetadata, EntityUpdate};
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::subscriptions::LifecycleEvent;
use crate::types::{
    BlockNumber, CreateReceipt, DeleteReceipt, EntityKey, ExtendReceipt, ExtendRequest,
    OwnerAddress, UpdateReceipt,
};
use std::time::{Duration, Instant};

/// Per-call deadline.
#[derive(Clone, Copy, Debug)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// No deadline.
    pub fn unbounded() -> Self {
        Self { deadline: None }
    }

    /// Time left before the deadline. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail with a timeout if the deadline has passed.
    pub fn check(&self, operation: &str) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(StoreError::timeout(format!("{operation} exceeded its deadline")))
            }
            _ => Ok(()),
        }
    }
}

/// Identifier of a backend event stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

/// An item on a backend event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamItem {
    Event(LifecycleEvent),
    /// Recoverable failure; the stream continues.
    Error(String),
}

/// A live event stream. The backend closes the channel when the stream
/// ends for good.
pub struct EventStream {
    pub id: StreamId,
    pub receiver: crossbeam_channel::Receiver<StreamItem>,
}

/// Remote entity store. Calls may block until the backend answers or the
/// context's deadline passes. Nothing here is retried by the client.
pub trait Backend: Send + Sync + 'static {
    fn current_block(&self, ctx: &CallContext) -> Result<BlockNumber>;

    /// Create every entity or none. Receipts come back in input order.
    fn create(
        &self,
        ctx: &CallContext,
        owner: &OwnerAddress,
        creates: &[EntityCreate],
    ) -> Result<Vec<CreateReceipt>>;

    /// Replace every entity or none. Only the owner may update.
    fn update(
        &self,
        ctx: &CallContext,
        owner: &OwnerAddress,
        updates: &[EntityUpdate],
    ) -> Result<Vec<UpdateReceipt>>;

    /// Delete every entity or none. Only the owner may delete.
    fn delete(
        &self,
        ctx: &CallContext,
        owner: &OwnerAddress,
        keys: &[EntityKey],
    ) -> Result<Vec<DeleteReceipt>>;

    /// Extend every entity or none. A failure names the key.
    fn extend(&self, ctx: &CallContext, requests: &[ExtendRequest]) -> Result<Vec<ExtendReceipt>>;

    fn get_metadata(&self, ctx: &CallContext, key: &EntityKey) -> Result<EntityMetadata>;

    fn get_payload(&self, ctx: &CallContext, key: &EntityKey) -> Result<Vec<u8>>;

    /// Keys of live entities matching `query`, in creation order.
    fn query(&self, ctx: &CallContext, query: &Query) -> Result<Vec<EntityKey>>;

    /// Open an event stream replaying every retained event at or after
    /// `from_block`, then continuing live.
    fn subscribe(&self, from_block: BlockNumber) -> Result<EventStream>;

    /// Close a stream. Unknown ids are ignored.
    fn unsubscribe(&self, id: StreamId);
}
