//! Blocks-to-live expiration.
//!
//! Entities live until the chain head reaches their expiration block.
//! Extensions only ever move that block forward.

mod manager;

pub use manager::{is_expired_at, ExpirationManager, Extension};
