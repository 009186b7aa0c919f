//! Subscription manager owning every live watch.

use crate::backend::Backend;
use crate::error::{Result, StoreError};
use crate::types::BlockNumber;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use super::delivery::{self, WatchHandle};
use super::types::{SubscriptionConfig, SubscriptionId, WatchHandlers};

/// Starts subscriptions against a backend and tracks them until they are
/// cancelled or the manager shuts down.
pub struct SubscriptionManager<B: Backend + ?Sized> {
    backend: Arc<B>,
    /// Defaults for new subscriptions.
    config: SubscriptionConfig,
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, WatchHandle>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Set under the registry write lock by `shutdown`.
    closed: AtomicBool,
}

impl<B: Backend + ?Sized> SubscriptionManager<B> {
    pub fn new(backend: Arc<B>, config: SubscriptionConfig) -> Self {
        Self {
            backend,
            config,
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Watch lifecycle events from `from_block` onward with the default config.
    pub fn watch(&self, from_block: BlockNumber, handlers: WatchHandlers) -> Result<WatchHandle> {
        let config = self.config.clone();
        self.watch_with_config(from_block, handlers, &config)
    }

    pub fn watch_with_config(
        &self,
        from_block: BlockNumber,
        handlers: WatchHandlers,
        config: &SubscriptionConfig,
    ) -> Result<WatchHandle> {
        if config.buffer_size == 0 {
            return Err(StoreError::Validation(
                "subscription buffer_size must be at least 1".into(),
            ));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::ShutDown);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let stream = self.backend.subscribe(from_block)?;
        let handle = delivery::spawn(id, Arc::clone(&self.backend), stream, handlers, config)
            .map_err(|e| StoreError::Validation(format!("could not start subscription: {e}")))?;

        let mut subs = self.subscriptions.write();
        // A shutdown may have drained the registry while this watch was starting.
        if self.closed.load(Ordering::SeqCst) {
            drop(subs);
            handle.cancel();
            return Err(StoreError::ShutDown);
        }
        subs.retain(|_, h| !h.is_finished());
        subs.insert(id, handle.clone());
        info!(subscription = id.0, from_block = from_block.0, "watching entity events");

        Ok(handle)
    }

    /// Cancel one subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let handle = self.subscriptions.write().remove(&id);
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// Subscriptions still delivering events.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .values()
            .filter(|h| !h.is_cancelled() && !h.is_finished())
            .count()
    }

    /// Cancel every subscription and wait for their threads to exit. Later
    /// watches fail with `ShutDown`.
    pub fn shutdown(&self) {
        let handles: Vec<WatchHandle> = {
            let mut subs = self.subscriptions.write();
            self.closed.store(true, Ordering::SeqCst);
            subs.drain().map(|(_, h)| h).collect()
        };
        if !handles.is_empty() {
            info!(count = handles.len(), "shutting down subscriptions");
        }
        for handle in handles {
            handle.cancel();
        }
    }
}

impl<B: Backend + ?Sized> Drop for SubscriptionManager<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
