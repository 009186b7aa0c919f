//! Per-subscription background delivery.
//!
//! Each watch runs two threads joined by a bounded queue:
//!
//! ```text
//! backend stream ──► ingest thread ──► bounded queue ──► delivery thread ──► callbacks
//!                    (never blocks      (overflow policy)  (one callback at a time)
//!                     on observers)
//! ```

use super::types::{
    LifecycleEvent, OverflowPolicy, SubscriptionConfig, SubscriptionId, WatchHandlers,
};
use crate::backend::{Backend, EventStream, StreamItem};
use crate::error::SubscriptionError;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, warn};

/// Queue item between ingestion and delivery.
enum Delivery {
    Event(LifecycleEvent),
    Error(SubscriptionError),
}

struct WatchInner {
    id: SubscriptionId,
    cancelled: AtomicBool,
    finished: AtomicBool,
    delivered: AtomicU64,
    /// Dropping the sender wakes both threads.
    cancel_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    delivery_thread: OnceLock<ThreadId>,
}

/// Handle to a running subscription.
///
/// Cancelling is idempotent and returns only after the background threads
/// have exited and the backend stream is closed. Dropping a handle does not
/// cancel the subscription.
#[derive(Clone)]
pub struct WatchHandle {
    inner: Arc<WatchInner>,
}

impl WatchHandle {
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Stop delivery and release the subscription's threads and buffers.
    ///
    /// Safe to call from inside a callback; in that case the delivery thread
    /// exits as soon as the callback returns.
    pub fn cancel(&self) {
        let inner = &self.inner;
        let was_cancelled = inner.cancelled.swap(true, Ordering::SeqCst);
        inner.cancel_tx.lock().take();

        if inner.delivery_thread.get() == Some(&thread::current().id()) {
            return;
        }

        let mut threads = inner.threads.lock();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                warn!(subscription = inner.id.0, "subscription thread panicked");
            }
        }
        if !was_cancelled {
            debug!(subscription = inner.id.0, "subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// True once delivery has stopped, by cancellation or a terminal
    /// disconnect.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Events handed to callbacks so far.
    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Start ingestion and delivery threads for an already-opened stream.
pub(crate) fn spawn<B: Backend + ?Sized>(
    id: SubscriptionId,
    backend: Arc<B>,
    stream: EventStream,
    handlers: WatchHandlers,
    config: &SubscriptionConfig,
) -> std::io::Result<WatchHandle> {
    let (cancel_tx, cancel_rx) = bounded::<()>(0);
    let (queue_tx, queue_rx) = bounded::<Delivery>(config.buffer_size);
    let dropped = Arc::new(AtomicU64::new(0));

    let inner = Arc::new(WatchInner {
        id,
        cancelled: AtomicBool::new(false),
        finished: AtomicBool::new(false),
        delivered: AtomicU64::new(0),
        cancel_tx: Mutex::new(Some(cancel_tx)),
        threads: Mutex::new(Vec::with_capacity(2)),
        delivery_thread: OnceLock::new(),
    });

    let ingest = Ingest {
        queue: queue_tx,
        oldest: queue_rx.clone(),
        policy: config.overflow,
        dropped: Arc::clone(&dropped),
    };
    let ingest_cancel = cancel_rx.clone();
    let stream_id = stream.id;
    let ingest_backend = Arc::clone(&backend);
    let ingest_thread = thread::Builder::new()
        .name(format!("watch-{}-ingest", id.0))
        .spawn(move || {
            ingest.run(stream, ingest_cancel);
            ingest_backend.unsubscribe(stream_id);
        });
    let ingest_thread = match ingest_thread {
        Ok(handle) => handle,
        Err(e) => {
            backend.unsubscribe(stream_id);
            return Err(e);
        }
    };
    inner.threads.lock().push(ingest_thread);

    let delivery_inner = Arc::clone(&inner);
    let delivery_thread = thread::Builder::new()
        .name(format!("watch-{}-deliver", id.0))
        .spawn(move || deliver(delivery_inner, queue_rx, cancel_rx, handlers, dropped));
    match delivery_thread {
        Ok(handle) => inner.threads.lock().push(handle),
        Err(e) => {
            let handle = WatchHandle { inner };
            handle.cancel();
            return Err(e);
        }
    }

    debug!(subscription = id.0, stream = stream_id.0, "subscription started");
    Ok(WatchHandle { inner })
}

struct Ingest {
    queue: Sender<Delivery>,
    /// Second receiver on the queue, used to evict the oldest item.
    oldest: Receiver<Delivery>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl Ingest {
    fn run(self, stream: EventStream, cancel: Receiver<()>) {
        loop {
            select! {
                recv(cancel) -> _ => return,
                recv(stream.receiver) -> msg => {
                    let delivered = match msg {
                        Ok(StreamItem::Event(event)) => self.enqueue(Delivery::Event(event)),
                        Ok(StreamItem::Error(message)) => {
                            self.enqueue(Delivery::Error(SubscriptionError::Transient(message)))
                        }
                        Err(_) => {
                            let error = SubscriptionError::Disconnected(
                                "backend closed the event stream".to_string(),
                            );
                            // The terminal notice must not be lost to overflow.
                            select! {
                                send(self.queue, Delivery::Error(error)) -> _ => {},
                                recv(cancel) -> _ => {},
                            }
                            return;
                        }
                    };
                    if !delivered {
                        return;
                    }
                }
            }
        }
    }

    /// Queue an item without blocking. Returns false once the delivery side
    /// has gone away.
    fn enqueue(&self, mut item: Delivery) -> bool {
        loop {
            match self.queue.try_send(item) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return false,
                Err(TrySendError::Full(rejected)) => match self.policy {
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::SeqCst);
                        return true;
                    }
                    OverflowPolicy::DropOldest => {
                        if self.oldest.try_recv().is_ok() {
                            self.dropped.fetch_add(1, Ordering::SeqCst);
                        }
                        item = rejected;
                    }
                },
            }
        }
    }
}

fn deliver(
    inner: Arc<WatchInner>,
    queue: Receiver<Delivery>,
    cancel: Receiver<()>,
    mut handlers: WatchHandlers,
    dropped: Arc<AtomicU64>,
) {
    let _ = inner.delivery_thread.set(thread::current().id());
    let mut last_sequence: Option<u64> = None;

    loop {
        let item = select! {
            recv(cancel) -> _ => break,
            recv(queue) -> msg => match msg {
                Ok(item) => item,
                Err(_) => break,
            },
        };
        if inner.cancelled.load(Ordering::SeqCst) {
            break;
        }

        let lost = dropped.swap(0, Ordering::SeqCst);
        if lost > 0 {
            warn!(subscription = inner.id.0, dropped = lost, "subscriber queue overflowed");
            guarded(inner.id, || {
                handlers.error(&SubscriptionError::Overflow { dropped: lost })
            });
        }

        match item {
            Delivery::Event(event) => {
                // Replay and live delivery can overlap; never repeat a sequence.
                if last_sequence.is_some_and(|last| event.sequence <= last) {
                    continue;
                }
                last_sequence = Some(event.sequence);
                guarded(inner.id, || handlers.dispatch(&event));
                inner.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Delivery::Error(error) => {
                let terminal = error.is_terminal();
                guarded(inner.id, || handlers.error(&error));
                if terminal {
                    debug!(subscription = inner.id.0, "event stream ended");
                    break;
                }
            }
        }
    }

    inner.finished.store(true, Ordering::SeqCst);
}

/// Run an observer callback. A panicking callback is logged and skipped.
fn guarded(id: SubscriptionId, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(subscription = id.0, "subscription callback panicked");
    }
}
