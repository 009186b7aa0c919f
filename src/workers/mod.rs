//! Bounded background work.
//!
//! Observer callbacks should not run slow or fallible side effects inline.
//! They hand them to a [`WorkerPool`] instead, which bounds the backlog and
//! reports every task's outcome through its [`TaskTicket`].

mod pool;

pub use pool::{PoolStats, TaskTicket, WorkerPool, WorkerPoolConfig};
