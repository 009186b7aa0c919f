//! Error types for the entity store client.

use crate::types::EntityKey;
use thiserror::Error;

/// Why a backend call failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendFailure {
    /// The call did not complete before its deadline.
    Timeout,
    /// The transport could not reach the backend.
    Unavailable,
    /// The backend rejected or failed the request.
    Remote,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendFailure::Timeout => write!(f, "timeout"),
            BackendFailure::Unavailable => write!(f, "unavailable"),
            BackendFailure::Remote => write!(f, "remote failure"),
        }
    }
}

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown key, or a key whose entity has expired.
    #[error("Entity not found: {0}")]
    NotFound(EntityKey),

    #[error("Query syntax error at offset {offset} near `{fragment}`: {message}")]
    QuerySyntax {
        fragment: String,
        offset: usize,
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend error ({kind}): {message}")]
    Backend {
        kind: BackendFailure,
        message: String,
    },

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// A batch was rejected as a whole because one item failed.
    #[error("Batch rejected at item {index}: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Extending {key} failed: {source}")]
    ExtendFailed {
        key: EntityKey,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Worker queue is full ({capacity} tasks pending)")]
    Backpressure { capacity: usize },

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Client has been shut down")]
    ShutDown,
}

impl StoreError {
    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        StoreError::Backend {
            kind: BackendFailure::Timeout,
            message: message.into(),
        }
    }

    pub(crate) fn remote(message: impl Into<String>) -> Self {
        StoreError::Backend {
            kind: BackendFailure::Remote,
            message: message.into(),
        }
    }

    /// True for `NotFound`, including when wrapped by a batch or extend error.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::BatchFailed { source, .. } | StoreError::ExtendFailed { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Failures produced while streaming events. Delivered through a
/// subscription's `on_error` handler, never returned to the caller of `watch`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The delivery queue was full and events were discarded.
    #[error("{dropped} event(s) dropped: subscriber queue overflowed")]
    Overflow { dropped: u64 },

    /// A recoverable stream failure; delivery continues.
    #[error("Transient stream error: {0}")]
    Transient(String),

    /// The event stream ended. No further events will arrive.
    #[error("Event stream disconnected: {0}")]
    Disconnected(String),
}

impl SubscriptionError {
    /// Whether delivery stops after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionError::Disconnected(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
