//! Fixed-size worker pool with a bounded task queue.

use crate::error::{Result, StoreError};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Configuration for a [`WorkerPool`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Worker threads.
    /// Default: 4
    pub workers: usize,

    /// Tasks queued before `submit` blocks and `try_submit` fails.
    /// Default: 64
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct Task {
    id: u64,
    job: Job,
    done: Sender<Result<()>>,
}

/// Counters for submitted work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

impl PoolStats {
    pub fn in_flight(&self) -> u64 {
        self.submitted - self.completed - self.failed
    }
}

struct Tracker {
    stats: Mutex<PoolStats>,
    idle: Condvar,
}

impl Tracker {
    fn finish(&self, ok: bool) {
        let mut stats = self.stats.lock();
        if ok {
            stats.completed += 1;
        } else {
            stats.failed += 1;
        }
        if stats.in_flight() == 0 {
            self.idle.notify_all();
        }
    }
}

/// Completion handle for a submitted task.
pub struct TaskTicket {
    id: u64,
    done: Receiver<Result<()>>,
}

impl TaskTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the task finishes and return its outcome.
    pub fn wait(self) -> Result<()> {
        self.done
            .recv()
            .map_err(|_| StoreError::TaskFailed(format!("task {} was abandoned", self.id)))?
    }

    /// The outcome if the task has already finished.
    pub fn try_result(&self) -> Option<Result<()>> {
        self.done.try_recv().ok()
    }
}

/// Runs side-effecting work off the caller's thread with bounded queueing
/// and observable completion. Panics inside a job are reported as
/// [`StoreError::TaskFailed`].
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    tracker: Arc<Tracker>,
    capacity: usize,
    next_task: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        if config.workers == 0 || config.queue_capacity == 0 {
            return Err(StoreError::Validation(
                "worker pool needs at least one worker and one queue slot".into(),
            ));
        }

        let (sender, receiver) = bounded::<Task>(config.queue_capacity);
        let tracker = Arc::new(Tracker {
            stats: Mutex::new(PoolStats::default()),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(config.workers);
        for n in 0..config.workers {
            let receiver = receiver.clone();
            let tracker = Arc::clone(&tracker);
            let handle = thread::Builder::new()
                .name(format!("ledgerkv-worker-{n}"))
                .spawn(move || run_worker(receiver, tracker))
                .map_err(|e| StoreError::Validation(format!("could not start worker: {e}")))?;
            workers.push(handle);
        }
        info!(workers = config.workers, capacity = config.queue_capacity, "worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            tracker,
            capacity: config.queue_capacity,
            next_task: AtomicU64::new(1),
        })
    }

    /// Queue a job, blocking while the queue is full.
    pub fn submit<F>(&self, job: F) -> Result<TaskTicket>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let sender = self.sender()?;
        let (task, ticket) = self.prepare(Box::new(job));
        if sender.send(task).is_err() {
            self.unprepare();
            return Err(StoreError::ShutDown);
        }
        Ok(ticket)
    }

    /// Queue a job, failing with [`StoreError::Backpressure`] when the queue
    /// is full.
    pub fn try_submit<F>(&self, job: F) -> Result<TaskTicket>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let sender = self.sender()?;
        let (task, ticket) = self.prepare(Box::new(job));
        match sender.try_send(task) {
            Ok(()) => Ok(ticket),
            Err(TrySendError::Full(_)) => {
                self.unprepare();
                Err(StoreError::Backpressure {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.unprepare();
                Err(StoreError::ShutDown)
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        *self.tracker.stats.lock()
    }

    /// Block until every submitted task has finished.
    pub fn wait_idle(&self) {
        let mut stats = self.tracker.stats.lock();
        while stats.in_flight() > 0 {
            self.tracker.idle.wait(&mut stats);
        }
    }

    /// Stop accepting work, let queued tasks finish, and join the workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("worker thread panicked outside a task");
            }
        }
        info!(stats = ?self.stats(), "worker pool stopped");
    }

    fn sender(&self) -> Result<Sender<Task>> {
        self.sender.lock().clone().ok_or(StoreError::ShutDown)
    }

    fn prepare(&self, job: Job) -> (Task, TaskTicket) {
        let id = self.next_task.fetch_add(1, Ordering::SeqCst);
        self.tracker.stats.lock().submitted += 1;
        let (done_tx, done_rx) = bounded(1);
        (
            Task {
                id,
                job,
                done: done_tx,
            },
            TaskTicket { id, done: done_rx },
        )
    }

    /// Undo `prepare` for a task that never reached the queue.
    fn unprepare(&self) {
        let mut stats = self.tracker.stats.lock();
        stats.submitted -= 1;
        if stats.in_flight() == 0 {
            self.tracker.idle.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<Task>, tracker: Arc<Tracker>) {
    for task in receiver.iter() {
        let outcome = match catch_unwind(AssertUnwindSafe(task.job)) {
            Ok(result) => result,
            Err(_) => Err(StoreError::TaskFailed(format!("task {} panicked", task.id))),
        };
        if let Err(ref e) = outcome {
            warn!(task = task.id, error = %e, "background task failed");
        } else {
            debug!(task = task.id, "background task completed");
        }
        tracker.finish(outcome.is_ok());
        let _ = task.done.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn pool(workers: usize, queue_capacity: usize) -> WorkerPool {
        WorkerPool::new(WorkerPoolConfig {
            workers,
            queue_capacity,
        })
        .unwrap()
    }

    #[test]
    fn test_tasks_run_and_report() {
        let pool = pool(2, 8);
        let counter = Arc::new(AtomicUsize::new(0));

        let tickets: Vec<_> = (0..5)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap()
            })
            .collect();

        for ticket in tickets {
            ticket.wait().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.stats().completed, 5);
    }

    #[test]
    fn test_failures_are_observable() {
        let pool = pool(1, 4);
        let failing = pool
            .submit(|| Err(StoreError::Validation("nope".into())))
            .unwrap();
        let panicking = pool.submit(|| panic!("boom")).unwrap();

        assert!(matches!(failing.wait(), Err(StoreError::Validation(_))));
        assert!(matches!(panicking.wait(), Err(StoreError::TaskFailed(_))));

        pool.wait_idle();
        let stats = pool.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn test_try_submit_backpressure() {
        let pool = pool(1, 1);
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);

        // Occupy the only worker.
        let blocker = pool
            .submit(move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
                Ok(())
            })
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // Fill the single queue slot.
        let queued = pool.try_submit(|| Ok(())).unwrap();
        assert!(matches!(
            pool.try_submit(|| Ok(())),
            Err(StoreError::Backpressure { capacity: 1 })
        ));

        release_tx.send(()).unwrap();
        blocker.wait().unwrap();
        queued.wait().unwrap();
        assert_eq!(pool.stats().submitted, 2);
    }

    #[test]
    fn test_shutdown_drains_and_rejects() {
        let pool = pool(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        pool.shutdown();
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(matches!(pool.submit(|| Ok(())), Err(StoreError::ShutDown)));
    }

    #[test]
    fn test_invalid_config() {
        assert!(WorkerPool::new(WorkerPoolConfig {
            workers: 0,
            queue_capacity: 1
        })
        .is_err());
    }
}
