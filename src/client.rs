//! Client facade tying the backend, query engine and subscriptions together.

use crate::backend::{Backend, CallContext};
use crate::entities::{EntityCreate, EntityMetadata, EntityUpdate};
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::subscriptions::{SubscriptionConfig, SubscriptionManager, WatchHandle, WatchHandlers};
use crate::types::{
    AccountIdentity, BlockNumber, CreateReceipt, DeleteReceipt, EntityKey, ExtendReceipt,
    ExtendRequest, OwnerAddress, UpdateReceipt,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline applied to every backend call.
    /// Default: 30s
    pub request_timeout: Duration,

    /// Defaults for `watch_logs`.
    pub subscription: SubscriptionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            subscription: SubscriptionConfig::default(),
        }
    }
}

/// The entity store client.
///
/// Provides a single surface for:
/// - Creating, updating, deleting and extending entities
/// - Reading metadata and payloads
/// - Querying by annotation predicate
/// - Watching lifecycle events
///
/// Every write is confirmed by the backend before it is reported; nothing
/// is retried. [`shutdown`](Client::shutdown) (or dropping the client)
/// cancels all subscriptions it started.
pub struct Client<B: Backend + ?Sized> {
    backend: Arc<B>,
    identity: AccountIdentity,
    config: ClientConfig,
    subscriptions: SubscriptionManager<B>,
    shut_down: AtomicBool,
}

impl<B: Backend + ?Sized> Client<B> {
    pub fn new(backend: Arc<B>, identity: AccountIdentity, config: ClientConfig) -> Self {
        let subscriptions = SubscriptionManager::new(Arc::clone(&backend), config.subscription.clone());
        info!(owner = %identity.owner_address(), "client created");
        Self {
            backend,
            identity,
            config,
            subscriptions,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Address entities created by this client are owned by.
    pub fn owner_address(&self) -> &OwnerAddress {
        self.identity.owner_address()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn current_block(&self) -> Result<BlockNumber> {
        let ctx = self.begin()?;
        self.backend.current_block(&ctx)
    }

    // --- Writes ---

    /// Create all entities or none.
    pub fn create_entities(&self, creates: &[EntityCreate]) -> Result<Vec<CreateReceipt>> {
        let ctx = self.begin()?;
        if creates.is_empty() {
            return Ok(Vec::new());
        }
        for (index, create) in creates.iter().enumerate() {
            create.validate().map_err(|e| batch_error(index, e))?;
        }

        let receipts = self.backend.create(&ctx, self.owner_address(), creates)?;
        expect_receipts("create", creates.len(), receipts.len())?;
        debug!(count = receipts.len(), "entities created");
        Ok(receipts)
    }

    /// Replace payload, annotations and BTL of owned entities, all or none.
    pub fn update_entities(&self, updates: &[EntityUpdate]) -> Result<Vec<UpdateReceipt>> {
        let ctx = self.begin()?;
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        for (index, update) in updates.iter().enumerate() {
            update.validate().map_err(|e| batch_error(index, e))?;
        }

        let receipts = self.backend.update(&ctx, self.owner_address(), updates)?;
        expect_receipts("update", updates.len(), receipts.len())?;
        debug!(count = receipts.len(), "entities updated");
        Ok(receipts)
    }

    /// Delete owned entities, all or none.
    pub fn delete_entities(&self, keys: &[EntityKey]) -> Result<Vec<DeleteReceipt>> {
        let ctx = self.begin()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let receipts = self.backend.delete(&ctx, self.owner_address(), keys)?;
        expect_receipts("delete", keys.len(), receipts.len())?;
        debug!(count = receipts.len(), "entities deleted");
        Ok(receipts)
    }

    /// Extend entities. A failure names the key that could not be extended.
    pub fn extend_entities(&self, requests: &[ExtendRequest]) -> Result<Vec<ExtendReceipt>> {
        let ctx = self.begin()?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        for request in requests {
            if request.number_of_blocks == 0 {
                return Err(StoreError::ExtendFailed {
                    key: request.entity_key,
                    source: Box::new(StoreError::Validation(
                        "number of blocks to extend by must be positive".into(),
                    )),
                });
            }
        }

        let receipts = self.backend.extend(&ctx, requests)?;
        expect_receipts("extend", requests.len(), receipts.len())?;
        for receipt in &receipts {
            if receipt.new_expiration_block <= receipt.old_expiration_block {
                return Err(StoreError::remote(format!(
                    "backend reported non-increasing expiration for {}",
                    receipt.entity_key
                )));
            }
        }
        Ok(receipts)
    }

    // --- Reads ---

    pub fn get_entity_metadata(&self, key: &EntityKey) -> Result<EntityMetadata> {
        let ctx = self.begin()?;
        self.backend.get_metadata(&ctx, key)
    }

    /// The entity's payload bytes.
    pub fn get_storage_value(&self, key: &EntityKey) -> Result<Vec<u8>> {
        let ctx = self.begin()?;
        self.backend.get_payload(&ctx, key)
    }

    /// Keys of live entities matching `predicate`, in creation order.
    ///
    /// The predicate is parsed locally, so syntax errors never reach the
    /// backend.
    pub fn query_entities(&self, predicate: &str) -> Result<Vec<EntityKey>> {
        let query = Query::parse(predicate)?;
        let ctx = self.begin()?;
        self.backend.query(&ctx, &query)
    }

    // --- Subscriptions ---

    /// Watch lifecycle events from `from_block` onward.
    pub fn watch_logs(&self, from_block: BlockNumber, handlers: WatchHandlers) -> Result<WatchHandle> {
        self.ensure_open()?;
        self.subscriptions.watch(from_block, handlers)
    }

    /// Like [`watch_logs`](Client::watch_logs) with a per-subscription config.
    pub fn watch_logs_with(
        &self,
        from_block: BlockNumber,
        handlers: WatchHandlers,
        config: &SubscriptionConfig,
    ) -> Result<WatchHandle> {
        self.ensure_open()?;
        self.subscriptions.watch_with_config(from_block, handlers, config)
    }

    /// Subscriptions still delivering events.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    /// Cancel every subscription and refuse further calls. Idempotent.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            self.subscriptions.shutdown();
            info!(owner = %self.owner_address(), "client shut down");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StoreError::ShutDown);
        }
        Ok(())
    }

    fn begin(&self) -> Result<CallContext> {
        self.ensure_open()?;
        Ok(CallContext::with_timeout(self.config.request_timeout))
    }
}

impl<B: Backend + ?Sized> Drop for Client<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn batch_error(index: usize, source: StoreError) -> StoreError {
    StoreError::BatchFailed {
        index,
        source: Box::new(source),
    }
}

/// The backend must answer every item or fail the call.
fn expect_receipts(operation: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(StoreError::remote(format!(
            "{operation} returned {got} receipt(s) for {expected} item(s)"
        )));
    }
    Ok(())
}
