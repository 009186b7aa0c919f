//! Live entity lifecycle subscriptions.
//!
//! A subscription reports `created`, `updated`, `extended` and `deleted`
//! transitions to observer callbacks:
//! - Replay from a caller-chosen block, then live delivery
//! - At most one callback running at a time per subscription
//! - Bounded buffering with an explicit overflow policy
//! - Stream errors routed to `on_error`, never thrown at the caller
//!
//! # Example
//!
//! ```ignore
//! let handle = manager.watch(
//!     BlockNumber(0),
//!     WatchHandlers::new()
//!         .on_created(|e| println!("created {}", e.entity_key))
//!         .on_deleted(|e| println!("deleted {}", e.entity_key))
//!         .on_error(|err| eprintln!("watch error: {err}")),
//! )?;
//!
//! // ...
//! handle.cancel();
//! ```

mod delivery;
mod manager;
mod types;

pub use delivery::WatchHandle;
pub use manager::SubscriptionManager;
pub use types::{
    ErrorCallback, EventCallback, EventKind, LifecycleEvent, OverflowPolicy, SubscriptionConfig,
    SubscriptionId, WatchHandlers,
};
