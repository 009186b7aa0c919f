//! # Ledger KV
//!
//! Client layer for an annotated, expiring key-value entity store.
//!
//! ## Core Concepts
//!
//! - **Entities**: Opaque payloads tagged with string and numeric annotations
//! - **Blocks-to-live**: Every entity expires a fixed number of blocks after
//!   it was written, unless extended
//! - **Queries**: Annotation predicates such as `type = "vote" && weight = 1`
//! - **Subscriptions**: Per-entity lifecycle events delivered to callbacks
//!
//! ## Example
//!
//! ```ignore
//! use ledgerkv::{AccountIdentity, Client, ClientConfig, EntityCreate, MemoryBackend};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(MemoryBackend::at_block(100));
//! let identity = AccountIdentity::from_address("0x1111111111111111111111111111111111111111")?;
//! let client = Client::new(backend, identity, ClientConfig::default());
//!
//! // Create an entity living for 25 blocks
//! let receipts = client.create_entities(&[
//!     EntityCreate::new(b"hello".to_vec(), 25)
//!         .with_string("type", "note")
//!         .with_numeric("num", 1),
//! ])?;
//!
//! // Find it again
//! let keys = client.query_entities(r#"type = "note" && num = 1"#)?;
//! assert_eq!(keys, vec![receipts[0].entity_key]);
//! ```

pub mod backend;
pub mod client;
pub mod entities;
pub mod error;
pub mod expiration;
pub mod query;
pub mod subscriptions;
pub mod types;
pub mod workers;

// Re-exports
pub use backend::{Backend, CallContext, EventStream, MemoryBackend, MemoryBackendConfig, StreamId, StreamItem};
pub use client::{Client, ClientConfig};
pub use entities::{
    Annotation, Entity, EntityCreate, EntityKind, EntityMetadata, EntityUpdate, GenericEntity,
    NumericAnnotation, ProposalEntity, StringAnnotation, VoteEntity,
};
pub use error::{BackendFailure, Result, StoreError, SubscriptionError};
pub use expiration::{ExpirationManager, Extension};
pub use query::{Predicate, Query};
pub use subscriptions::{
    EventKind, LifecycleEvent, OverflowPolicy, SubscriptionConfig, SubscriptionId,
    SubscriptionManager, WatchHandle, WatchHandlers,
};
pub use types::{
    AccountIdentity, BlockNumber, CreateReceipt, DeleteReceipt, EntityKey, ExtendReceipt,
    ExtendRequest, OwnerAddress, UpdateReceipt,
};
pub use workers::{PoolStats, TaskTicket, WorkerPool, WorkerPoolConfig};
