//! In-process backend holding entities in memory.

use super::{Backend, CallContext, EventStream, StreamId, StreamItem};
use crate::entities::{Entity, EntityCreate, EntityMetadata, EntityUpdate};
use crate::error::{BackendFailure, Result, StoreError};
use crate::expiration::ExpirationManager;
use crate::query::{evaluate, Query};
use crate::subscriptions::{EventKind, LifecycleEvent};
use crate::types::{
    BlockNumber, CreateReceipt, DeleteReceipt, EntityKey, ExtendReceipt, ExtendRequest,
    OwnerAddress, UpdateReceipt,
};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for [`MemoryBackend`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBackendConfig {
    /// Chain head when the backend starts.
    pub initial_block: BlockNumber,

    /// Largest accepted blocks-to-live (None = unlimited).
    pub max_btl: Option<u64>,

    /// Simulated transport latency applied to every call.
    pub latency: Option<Duration>,

    /// Live events buffered per stream before the stream is dropped.
    /// Default: 1024
    pub stream_buffer: usize,

    /// Events retained for replay to new streams.
    /// Default: 100_000
    pub journal_limit: usize,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            initial_block: BlockNumber(0),
            max_btl: None,
            latency: None,
            stream_buffer: 1024,
            journal_limit: 100_000,
        }
    }
}

/// Input hashed to derive an entity key.
#[derive(Serialize)]
struct KeyEnvelope<'a> {
    owner: &'a str,
    nonce: u64,
    block: u64,
    btl: u64,
    data: &'a [u8],
}

struct StoredEntity {
    /// Position in creation order.
    order: u64,
    entity: Entity,
}

struct State {
    entities: HashMap<EntityKey, StoredEntity>,
    creation_order: BTreeMap<u64, EntityKey>,
    next_order: u64,
    expiration: ExpirationManager,
    journal: VecDeque<LifecycleEvent>,
    journal_limit: usize,
    /// Block of the newest event dropped from the journal.
    evicted_through: Option<BlockNumber>,
    next_event_seq: u64,
    streams: HashMap<StreamId, Sender<StreamItem>>,
}

impl State {
    /// A live entity, or `NotFound`.
    fn live(&self, key: &EntityKey) -> Result<&StoredEntity> {
        match self.entities.get(key) {
            Some(stored) if self.expiration.is_live(key) => Ok(stored),
            _ => Err(StoreError::NotFound(*key)),
        }
    }

    fn remove(&mut self, key: &EntityKey) {
        if let Some(stored) = self.entities.remove(key) {
            self.creation_order.remove(&stored.order);
        }
        self.expiration.remove(key);
    }

    /// Journal an event and push it to every open stream.
    fn emit(&mut self, kind: EventKind, key: EntityKey, expiration_block: Option<BlockNumber>) {
        let event = LifecycleEvent {
            sequence: self.next_event_seq,
            block: self.expiration.current_block(),
            kind,
            entity_key: key,
            expiration_block,
        };
        self.next_event_seq += 1;

        self.journal.push_back(event.clone());
        while self.journal.len() > self.journal_limit {
            if let Some(evicted) = self.journal.pop_front() {
                self.evicted_through = Some(evicted.block);
            }
        }

        self.broadcast(StreamItem::Event(event));
    }

    /// Streams that cannot keep up or whose reader is gone are closed.
    fn broadcast(&mut self, item: StreamItem) {
        let mut to_remove = Vec::new();
        for (id, sender) in self.streams.iter() {
            match sender.try_send(item.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(stream = id.0, "closing event stream: buffer full");
                    to_remove.push(*id);
                }
                Err(TrySendError::Disconnected(_)) => to_remove.push(*id),
            }
        }
        for id in to_remove {
            self.streams.remove(&id);
        }
    }
}

/// Entity store kept entirely in memory.
///
/// Blocks advance only when [`advance_blocks`](MemoryBackend::advance_blocks)
/// is called, which also sweeps expired entities and emits their deletions.
pub struct MemoryBackend {
    config: MemoryBackendConfig,
    state: RwLock<State>,
    next_stream_id: AtomicU64,
    nonce: AtomicU64,
    injected_failure: Mutex<Option<(BackendFailure, String)>>,
}

impl MemoryBackend {
    pub fn new(config: MemoryBackendConfig) -> Self {
        let state = State {
            entities: HashMap::new(),
            creation_order: BTreeMap::new(),
            next_order: 0,
            expiration: ExpirationManager::new(config.initial_block),
            journal: VecDeque::new(),
            journal_limit: config.journal_limit,
            evicted_through: None,
            next_event_seq: 1,
            streams: HashMap::new(),
        };
        Self {
            config,
            state: RwLock::new(state),
            next_stream_id: AtomicU64::new(1),
            nonce: AtomicU64::new(0),
            injected_failure: Mutex::new(None),
        }
    }

    /// Backend with default config starting at `block`.
    pub fn at_block(block: u64) -> Self {
        Self::new(MemoryBackendConfig {
            initial_block: BlockNumber(block),
            ..Default::default()
        })
    }

    pub fn block_number(&self) -> BlockNumber {
        self.state.read().expiration.current_block()
    }

    /// Move the chain head forward, deleting every entity that expires.
    pub fn advance_blocks(&self, blocks: u64) -> Result<Vec<EntityKey>> {
        let mut state = self.state.write();
        let target = state.expiration.current_block().plus(blocks)?;
        let expired = state.expiration.advance_to(target)?;
        for key in &expired {
            state.remove(key);
            state.emit(EventKind::Deleted, *key, None);
        }
        info!(block = target.0, expired = expired.len(), "advanced chain head");
        Ok(expired)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        let state = self.state.read();
        state
            .entities
            .keys()
            .filter(|k| state.expiration.is_live(k))
            .count()
    }

    pub fn stream_count(&self) -> usize {
        self.state.read().streams.len()
    }

    /// Send a recoverable error to every open stream.
    pub fn inject_stream_error(&self, message: impl Into<String>) {
        self.state.write().broadcast(StreamItem::Error(message.into()));
    }

    /// Close every open stream, as a dropped connection would.
    pub fn disconnect_streams(&self) {
        let mut state = self.state.write();
        warn!(streams = state.streams.len(), "disconnecting all event streams");
        state.streams.clear();
    }

    /// Make the next call fail with the given failure.
    pub fn fail_next_call(&self, kind: BackendFailure, message: impl Into<String>) {
        *self.injected_failure.lock() = Some((kind, message.into()));
    }

    /// Common preamble: injected failures, simulated latency, deadline.
    fn begin(&self, ctx: &CallContext, operation: &str) -> Result<()> {
        if let Some((kind, message)) = self.injected_failure.lock().take() {
            return Err(StoreError::Backend { kind, message });
        }
        if let Some(latency) = self.config.latency {
            let wait = ctx.remaining().map_or(latency, |r| r.min(latency));
            std::thread::sleep(wait);
        }
        ctx.check(operation)
    }

    fn check_btl(&self, btl: u64) -> Result<()> {
        match self.config.max_btl {
            Some(max) if btl > max => Err(StoreError::Validation(format!(
                "btl {btl} exceeds the maximum of {max} blocks"
            ))),
            _ => Ok(()),
        }
    }

    fn derive_key(&self, owner: &OwnerAddress, block: BlockNumber, create: &EntityCreate) -> Result<EntityKey> {
        let envelope = KeyEnvelope {
            owner: owner.as_str(),
            nonce: self.nonce.fetch_add(1, Ordering::SeqCst),
            block: block.0,
            btl: create.btl,
            data: &create.data,
        };
        Ok(EntityKey::from_bytes(&rmp_serde::to_vec(&envelope)?))
    }
}

fn batch_error(index: usize, source: StoreError) -> StoreError {
    StoreError::BatchFailed {
        index,
        source: Box::new(source),
    }
}

fn extend_error(key: EntityKey, source: StoreError) -> StoreError {
    StoreError::ExtendFailed {
        key,
        source: Box::new(source),
    }
}

fn check_owner(entity: &Entity, owner: &OwnerAddress) -> Result<()> {
    if &entity.owner != owner {
        return Err(StoreError::Validation(format!(
            "{} is owned by {}, not {}",
            entity.key, entity.owner, owner
        )));
    }
    Ok(())
}

impl Backend for MemoryBackend {
    fn current_block(&self, ctx: &CallContext) -> Result<BlockNumber> {
        self.begin(ctx, "current_block")?;
        Ok(self.block_number())
    }

    fn create(
        &self,
        ctx: &CallContext,
        owner: &OwnerAddress,
        creates: &[EntityCreate],
    ) -> Result<Vec<CreateReceipt>> {
        self.begin(ctx, "create")?;

        let mut state = self.state.write();
        let block = state.expiration.current_block();

        // Everything that can fail happens before the first write.
        let mut keys = Vec::with_capacity(creates.len());
        for (index, create) in creates.iter().enumerate() {
            create
                .validate()
                .and_then(|_| self.check_btl(create.btl))
                .and_then(|_| block.plus(create.btl))
                .map_err(|e| batch_error(index, e))?;
            let key = self.derive_key(owner, block, create)?;
            if state.entities.contains_key(&key) {
                return Err(batch_error(
                    index,
                    StoreError::remote(format!("entity key collision on {key}")),
                ));
            }
            keys.push(key);
        }

        let mut receipts = Vec::with_capacity(creates.len());
        for (create, key) in creates.iter().zip(keys) {
            let expires_at = state.expiration.create(key, create.btl)?;
            let order = state.next_order;
            state.next_order += 1;
            state.creation_order.insert(order, key);
            state.entities.insert(
                key,
                StoredEntity {
                    order,
                    entity: Entity {
                        key,
                        payload: create.data.clone(),
                        string_annotations: create.string_annotations.clone(),
                        numeric_annotations: create.numeric_annotations.clone(),
                        owner: owner.clone(),
                        expires_at_block: expires_at,
                    },
                },
            );
            state.emit(EventKind::Created, key, Some(expires_at));
            debug!(key = %key, expires_at = expires_at.0, "entity created");
            receipts.push(CreateReceipt {
                entity_key: key,
                expiration_block: expires_at,
            });
        }
        Ok(receipts)
    }

    fn update(
        &self,
        ctx: &CallContext,
        owner: &OwnerAddress,
        updates: &[EntityUpdate],
    ) -> Result<Vec<UpdateReceipt>> {
        self.begin(ctx, "update")?;

        let mut state = self.state.write();
        let block = state.expiration.current_block();

        let mut seen = HashSet::new();
        for (index, update) in updates.iter().enumerate() {
            let mut check = || -> Result<()> {
                update.validate()?;
                self.check_btl(update.btl)?;
                block.plus(update.btl)?;
                if !seen.insert(update.entity_key) {
                    return Err(StoreError::Validation(format!(
                        "{} appears more than once in the batch",
                        update.entity_key
                    )));
                }
                check_owner(&state.live(&update.entity_key)?.entity, owner)
            };
            check().map_err(|e| batch_error(index, e))?;
        }

        let mut receipts = Vec::with_capacity(updates.len());
        for update in updates {
            let key = update.entity_key;
            let expires_at = state.expiration.reset(&key, update.btl)?;
            if let Some(stored) = state.entities.get_mut(&key) {
                stored.entity.payload = update.data.clone();
                stored.entity.string_annotations = update.string_annotations.clone();
                stored.entity.numeric_annotations = update.numeric_annotations.clone();
                stored.entity.expires_at_block = expires_at;
            }
            state.emit(EventKind::Updated, key, Some(expires_at));
            debug!(key = %key, expires_at = expires_at.0, "entity updated");
            receipts.push(UpdateReceipt {
                entity_key: key,
                expiration_block: expires_at,
            });
        }
        Ok(receipts)
    }

    fn delete(
        &self,
        ctx: &CallContext,
        owner: &OwnerAddress,
        keys: &[EntityKey],
    ) -> Result<Vec<DeleteReceipt>> {
        self.begin(ctx, "delete")?;

        let mut state = self.state.write();

        let mut seen = HashSet::new();
        for (index, key) in keys.iter().enumerate() {
            if !seen.insert(*key) {
                return Err(batch_error(
                    index,
                    StoreError::Validation(format!("{key} appears more than once in the batch")),
                ));
            }
            state
                .live(key)
                .and_then(|stored| check_owner(&stored.entity, owner))
                .map_err(|e| batch_error(index, e))?;
        }

        let mut receipts = Vec::with_capacity(keys.len());
        for key in keys {
            state.remove(key);
            state.emit(EventKind::Deleted, *key, None);
            debug!(key = %key, "entity deleted");
            receipts.push(DeleteReceipt { entity_key: *key });
        }
        Ok(receipts)
    }

    fn extend(&self, ctx: &CallContext, requests: &[ExtendRequest]) -> Result<Vec<ExtendReceipt>> {
        self.begin(ctx, "extend")?;

        let mut state = self.state.write();

        // Project the final expiration per key so repeated keys and
        // overflow are caught before anything is applied.
        let mut projected: HashMap<EntityKey, BlockNumber> = HashMap::new();
        for request in requests {
            let key = request.entity_key;
            let check = || -> Result<BlockNumber> {
                if request.number_of_blocks == 0 {
                    return Err(StoreError::Validation(
                        "number of blocks to extend by must be positive".into(),
                    ));
                }
                let current = match projected.get(&key) {
                    Some(block) => *block,
                    None => state.live(&key)?.entity.expires_at_block,
                };
                current.plus(request.number_of_blocks)
            };
            let next = check().map_err(|e| extend_error(key, e))?;
            projected.insert(key, next);
        }

        let mut receipts = Vec::with_capacity(requests.len());
        for request in requests {
            let key = request.entity_key;
            let extension = state
                .expiration
                .extend(&key, request.number_of_blocks)
                .map_err(|e| extend_error(key, e))?;
            if let Some(stored) = state.entities.get_mut(&key) {
                stored.entity.expires_at_block = extension.new_expiration;
            }
            state.emit(EventKind::Extended, key, Some(extension.new_expiration));
            debug!(
                key = %key,
                from = extension.old_expiration.0,
                to = extension.new_expiration.0,
                "entity extended"
            );
            receipts.push(ExtendReceipt {
                entity_key: key,
                old_expiration_block: extension.old_expiration,
                new_expiration_block: extension.new_expiration,
            });
        }
        Ok(receipts)
    }

    fn get_metadata(&self, ctx: &CallContext, key: &EntityKey) -> Result<EntityMetadata> {
        self.begin(ctx, "get_metadata")?;
        let state = self.state.read();
        Ok(state.live(key)?.entity.metadata())
    }

    fn get_payload(&self, ctx: &CallContext, key: &EntityKey) -> Result<Vec<u8>> {
        self.begin(ctx, "get_payload")?;
        let state = self.state.read();
        Ok(state.live(key)?.entity.payload.clone())
    }

    fn query(&self, ctx: &CallContext, query: &Query) -> Result<Vec<EntityKey>> {
        self.begin(ctx, "query")?;
        let state = self.state.read();
        let live = state
            .creation_order
            .values()
            .filter_map(|key| state.live(key).ok())
            .map(|stored| &stored.entity);
        Ok(evaluate(query.predicate(), live))
    }

    fn subscribe(&self, from_block: BlockNumber) -> Result<EventStream> {
        let mut state = self.state.write();

        let replay: Vec<LifecycleEvent> = state
            .journal
            .iter()
            .filter(|event| event.block >= from_block)
            .cloned()
            .collect();

        // Events at or after `from_block` that were already evicted cannot be
        // replayed. The reader is told before the partial replay begins.
        let gap = match state.evicted_through {
            Some(evicted) if evicted >= from_block => Some(evicted),
            _ => None,
        };

        let (sender, receiver) = bounded(self.config.stream_buffer + replay.len() + 1);
        if let Some(evicted) = gap {
            warn!(
                from_block = from_block.0,
                evicted_through = evicted.0,
                "replay requested past the retained journal"
            );
            sender
                .try_send(StreamItem::Error(format!(
                    "events through block {evicted} are no longer retained; replay from block {from_block} is incomplete"
                )))
                .map_err(|e| StoreError::remote(format!("stream replay failed: {e}")))?;
        }
        let replayed = replay.len();
        for event in replay {
            sender
                .try_send(StreamItem::Event(event))
                .map_err(|e| StoreError::remote(format!("stream replay failed: {e}")))?;
        }

        let id = StreamId(self.next_stream_id.fetch_add(1, Ordering::SeqCst));
        state.streams.insert(id, sender);
        debug!(stream = id.0, from_block = from_block.0, replayed, "event stream opened");

        Ok(EventStream { id, receiver })
    }

    fn unsubscribe(&self, id: StreamId) {
        if self.state.write().streams.remove(&id).is_some() {
            debug!(stream = id.0, "event stream closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendFailure;

    fn owner() -> OwnerAddress {
        OwnerAddress::parse("0x00000000000000000000000000000000000000aa").unwrap()
    }

    fn stranger() -> OwnerAddress {
        OwnerAddress::parse("0x00000000000000000000000000000000000000bb").unwrap()
    }

    fn ctx() -> CallContext {
        CallContext::unbounded()
    }

    fn create_one(backend: &MemoryBackend, btl: u64) -> EntityKey {
        backend
            .create(&ctx(), &owner(), &[EntityCreate::new(b"data".to_vec(), btl)])
            .unwrap()[0]
            .entity_key
    }

    #[test]
    fn test_create_assigns_unique_keys() {
        let backend = MemoryBackend::at_block(100);
        let same = EntityCreate::new(b"same".to_vec(), 10);
        let receipts = backend
            .create(&ctx(), &owner(), &[same.clone(), same])
            .unwrap();
        assert_ne!(receipts[0].entity_key, receipts[1].entity_key);
        assert_eq!(receipts[0].expiration_block, BlockNumber(110));
        assert_eq!(backend.entity_count(), 2);
    }

    #[test]
    fn test_create_is_all_or_nothing() {
        let backend = MemoryBackend::at_block(1);
        let result = backend.create(
            &ctx(),
            &owner(),
            &[
                EntityCreate::new(b"ok".to_vec(), 10),
                EntityCreate::new(b"bad".to_vec(), 0),
            ],
        );
        assert!(matches!(result, Err(StoreError::BatchFailed { index: 1, .. })));
        assert_eq!(backend.entity_count(), 0);
    }

    #[test]
    fn test_max_btl() {
        let backend = MemoryBackend::new(MemoryBackendConfig {
            max_btl: Some(50),
            ..Default::default()
        });
        let result = backend.create(&ctx(), &owner(), &[EntityCreate::new(b"x".to_vec(), 51)]);
        assert!(matches!(result, Err(StoreError::BatchFailed { index: 0, .. })));
    }

    #[test]
    fn test_expired_entity_is_not_found() {
        let backend = MemoryBackend::at_block(10);
        let key = create_one(&backend, 5);
        backend.advance_blocks(4).unwrap();
        assert!(backend.get_payload(&ctx(), &key).is_ok());
        assert_eq!(backend.advance_blocks(1).unwrap(), vec![key]);
        assert!(matches!(backend.get_payload(&ctx(), &key), Err(StoreError::NotFound(_))));
        assert!(matches!(backend.get_metadata(&ctx(), &key), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_update_requires_owner() {
        let backend = MemoryBackend::at_block(1);
        let key = create_one(&backend, 10);
        let result = backend.update(&ctx(), &stranger(), &[EntityUpdate::new(key, b"new".to_vec(), 5)]);
        assert!(matches!(result, Err(StoreError::BatchFailed { index: 0, .. })));
        assert_eq!(backend.get_payload(&ctx(), &key).unwrap(), b"data".to_vec());
    }

    #[test]
    fn test_update_replaces_payload_and_btl() {
        let backend = MemoryBackend::at_block(1);
        let key = create_one(&backend, 10);
        let receipts = backend
            .update(
                &ctx(),
                &owner(),
                &[EntityUpdate::new(key, b"new".to_vec(), 50).with_string("k", "v")],
            )
            .unwrap();
        assert_eq!(receipts[0].expiration_block, BlockNumber(51));
        assert_eq!(backend.get_payload(&ctx(), &key).unwrap(), b"new".to_vec());
        let meta = backend.get_metadata(&ctx(), &key).unwrap();
        assert_eq!(meta.string_annotation("k"), Some("v"));
        assert_eq!(meta.expires_at_block, BlockNumber(51));
    }

    #[test]
    fn test_delete() {
        let backend = MemoryBackend::at_block(1);
        let key = create_one(&backend, 10);
        assert!(backend.delete(&ctx(), &stranger(), &[key]).is_err());
        assert!(backend.delete(&ctx(), &owner(), &[key, key]).is_err());
        backend.delete(&ctx(), &owner(), &[key]).unwrap();
        assert_eq!(backend.entity_count(), 0);
        assert!(backend.delete(&ctx(), &owner(), &[key]).unwrap_err().is_not_found());
    }

    #[test]
    fn test_extend_names_failing_key() {
        let backend = MemoryBackend::at_block(1);
        let good = create_one(&backend, 10);
        let missing = EntityKey::from_bytes(b"missing");
        let result = backend.extend(
            &ctx(),
            &[ExtendRequest::new(good, 5), ExtendRequest::new(missing, 5)],
        );
        match result {
            Err(StoreError::ExtendFailed { key, source }) => {
                assert_eq!(key, missing);
                assert!(matches!(*source, StoreError::NotFound(_)));
            }
            other => panic!("Expected ExtendFailed, got {:?}", other),
        }
        // Nothing applied.
        assert_eq!(
            backend.get_metadata(&ctx(), &good).unwrap().expires_at_block,
            BlockNumber(11)
        );
    }

    #[test]
    fn test_repeated_extension_in_one_batch() {
        let backend = MemoryBackend::at_block(0);
        let key = create_one(&backend, 10);
        let receipts = backend
            .extend(&ctx(), &[ExtendRequest::new(key, 5), ExtendRequest::new(key, 7)])
            .unwrap();
        assert_eq!(receipts[0].new_expiration_block, BlockNumber(15));
        assert_eq!(receipts[1].old_expiration_block, BlockNumber(15));
        assert_eq!(receipts[1].new_expiration_block, BlockNumber(22));
    }

    #[test]
    fn test_query_uses_creation_order() {
        let backend = MemoryBackend::at_block(0);
        let a = backend
            .create(&ctx(), &owner(), &[EntityCreate::new(b"a".to_vec(), 10).with_numeric("n", 1)])
            .unwrap()[0]
            .entity_key;
        let b = backend
            .create(&ctx(), &owner(), &[EntityCreate::new(b"b".to_vec(), 5).with_numeric("n", 1)])
            .unwrap()[0]
            .entity_key;
        let query = Query::parse("n = 1").unwrap();
        assert_eq!(backend.query(&ctx(), &query).unwrap(), vec![a, b]);

        backend.advance_blocks(5).unwrap();
        assert_eq!(backend.query(&ctx(), &query).unwrap(), vec![a]);
    }

    #[test]
    fn test_advance_to_last_block_height() {
        let backend = MemoryBackend::at_block(u64::MAX - 5);
        let key = create_one(&backend, 5);
        assert_eq!(backend.advance_blocks(5).unwrap(), vec![key]);
        assert_eq!(backend.block_number(), BlockNumber(u64::MAX));
        assert!(backend.advance_blocks(1).is_err());
        assert_eq!(backend.entity_count(), 0);
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let backend = MemoryBackend::at_block(0);
        backend.fail_next_call(BackendFailure::Unavailable, "connection refused");
        assert!(matches!(
            backend.current_block(&ctx()),
            Err(StoreError::Backend { kind: BackendFailure::Unavailable, .. })
        ));
        assert_eq!(backend.current_block(&ctx()).unwrap(), BlockNumber(0));
    }

    #[test]
    fn test_latency_past_deadline_times_out() {
        let backend = MemoryBackend::new(MemoryBackendConfig {
            latency: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let ctx = CallContext::with_timeout(Duration::from_millis(10));
        assert!(matches!(
            backend.current_block(&ctx),
            Err(StoreError::Backend { kind: BackendFailure::Timeout, .. })
        ));
    }

    #[test]
    fn test_subscribe_replays_from_block() {
        let backend = MemoryBackend::at_block(0);
        create_one(&backend, 100);
        backend.advance_blocks(10).unwrap();
        let later = create_one(&backend, 100);

        let stream = backend.subscribe(BlockNumber(5)).unwrap();
        match stream.receiver.try_recv().unwrap() {
            StreamItem::Event(event) => {
                assert_eq!(event.entity_key, later);
                assert_eq!(event.kind, EventKind::Created);
                assert_eq!(event.block, BlockNumber(10));
            }
            other => panic!("Expected event, got {:?}", other),
        }
        assert!(stream.receiver.try_recv().is_err());

        backend.unsubscribe(stream.id);
        assert_eq!(backend.stream_count(), 0);
    }

    #[test]
    fn test_slow_stream_is_closed() {
        let backend = MemoryBackend::new(MemoryBackendConfig {
            stream_buffer: 2,
            ..Default::default()
        });
        let stream = backend.subscribe(BlockNumber(0)).unwrap();
        for _ in 0..5 {
            create_one(&backend, 10);
        }
        assert_eq!(backend.stream_count(), 0);
        // Buffered events are still readable, then the channel reports closed.
        assert_eq!(stream.receiver.iter().count(), 2);
    }

    #[test]
    fn test_replay_past_truncated_journal_reports_gap() {
        let backend = MemoryBackend::new(MemoryBackendConfig {
            journal_limit: 2,
            ..Default::default()
        });
        let key = create_one(&backend, 10);
        backend.advance_blocks(1).unwrap();
        backend.extend(&ctx(), &[ExtendRequest::new(key, 5)]).unwrap();
        backend.extend(&ctx(), &[ExtendRequest::new(key, 5)]).unwrap();

        let stream = backend.subscribe(BlockNumber(0)).unwrap();
        let items: Vec<_> = stream.receiver.try_iter().collect();
        assert_eq!(items.len(), 3);
        match &items[0] {
            StreamItem::Error(message) => assert!(message.contains("block 0")),
            other => panic!("Expected replay gap error, got {:?}", other),
        }
        for item in &items[1..] {
            match item {
                StreamItem::Event(event) => assert_eq!(event.kind, EventKind::Extended),
                other => panic!("Expected event, got {:?}", other),
            }
        }

        // Nothing retained at block 1 or later was evicted.
        let stream = backend.subscribe(BlockNumber(1)).unwrap();
        let items: Vec<_> = stream.receiver.try_iter().collect();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| matches!(item, StreamItem::Event(_))));
    }
}
