//! # Recall Sync
//!
//! Mutual-exclusion and coalescing primitives shared by the memory engine.
//!
//! - [`Lock`] runs queued units of async work one at a time, in FIFO order.
//! - [`LockedResource`] guards a single value with the same queue.
//! - [`KeyedLock`] materializes one [`Lock`] per key and drops it once the key goes idle.
//! - [`Debouncer`] collapses bursts of triggers into a single deferred callback.
//!
//! All locks detect re-entrant acquisition from the task that already holds them and
//! return [`SyncError::Reentrant`] instead of deadlocking.

mod debounce;
mod error;
mod keyed;
mod lock;

pub use debounce::{DebounceCallback, Debouncer};
pub use error::{Result, SyncError};
pub use keyed::KeyedLock;
pub use lock::{Lock, LockedResource};
