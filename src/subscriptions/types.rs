//! Subscription types for entity lifecycle events.

use crate::error::SubscriptionError;
use crate::types::{BlockNumber, EntityKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Extended,
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Extended => "extended",
            EventKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A single lifecycle transition.
///
/// Payload and annotations are not carried; observers re-fetch them
/// through the client when they need them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Backend-wide, strictly increasing event number.
    pub sequence: u64,
    /// Block in which the transition happened.
    pub block: BlockNumber,
    pub kind: EventKind,
    pub entity_key: EntityKey,
    /// Expiration after the transition. `None` for deletions.
    pub expiration_block: Option<BlockNumber>,
}

/// What the delivery queue does when it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued event to make room.
    #[default]
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
}

/// Configuration for a subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Max events queued between ingestion and the observer callbacks.
    /// Default: 1000
    pub buffer_size: usize,

    /// Overflow behaviour. Every discarded event is reported through
    /// `on_error` as [`SubscriptionError::Overflow`].
    pub overflow: OverflowPolicy,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type EventCallback = Box<dyn FnMut(&LifecycleEvent) + Send>;
pub type ErrorCallback = Box<dyn FnMut(&SubscriptionError) + Send>;

/// Observer callbacks, one per event kind. A missing callback silently
/// drops that kind of event.
#[derive(Default)]
pub struct WatchHandlers {
    on_created: Option<EventCallback>,
    on_updated: Option<EventCallback>,
    on_extended: Option<EventCallback>,
    on_deleted: Option<EventCallback>,
    on_error: Option<ErrorCallback>,
}

impl WatchHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_created(mut self, f: impl FnMut(&LifecycleEvent) + Send + 'static) -> Self {
        self.on_created = Some(Box::new(f));
        self
    }

    pub fn on_updated(mut self, f: impl FnMut(&LifecycleEvent) + Send + 'static) -> Self {
        self.on_updated = Some(Box::new(f));
        self
    }

    pub fn on_extended(mut self, f: impl FnMut(&LifecycleEvent) + Send + 'static) -> Self {
        self.on_extended = Some(Box::new(f));
        self
    }

    pub fn on_deleted(mut self, f: impl FnMut(&LifecycleEvent) + Send + 'static) -> Self {
        self.on_deleted = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&SubscriptionError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Route one event to its callback.
    pub(crate) fn dispatch(&mut self, event: &LifecycleEvent) {
        let handler = match event.kind {
            EventKind::Created => self.on_created.as_mut(),
            EventKind::Updated => self.on_updated.as_mut(),
            EventKind::Extended => self.on_extended.as_mut(),
            EventKind::Deleted => self.on_deleted.as_mut(),
        };
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub(crate) fn error(&mut self, error: &SubscriptionError) {
        if let Some(handler) = self.on_error.as_mut() {
            handler(error);
        }
    }
}

impl fmt::Debug for WatchHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandlers")
            .field("on_created", &self.on_created.is_some())
            .field("on_updated", &self.on_updated.is_some())
            .field("on_extended", &self.on_extended.is_some())
            .field("on_deleted", &self.on_deleted.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
