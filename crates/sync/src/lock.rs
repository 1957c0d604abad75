use crate::{Result, SyncError};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Ids of every lock held by the current task, outermost first.
    static HELD_LOCKS: Vec<u64>;
}

/// Counts a waiter (or the running holder) for as long as it is alive.
pub(crate) struct QueueTicket<'a> {
    queued: &'a AtomicUsize,
}

impl<'a> QueueTicket<'a> {
    fn enter(queued: &'a AtomicUsize) -> Self {
        queued.fetch_add(1, Ordering::AcqRel);
        Self { queued }
    }
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A value protected by a FIFO queue of async work.
///
/// Waiters are served strictly in the order they called in (tokio's mutex is fair), one
/// at a time, and the stored value may be borrowed across `.await` points by the running
/// work. There is no cancellation: dropping a waiter only removes it from the queue.
pub struct LockedResource<T> {
    id: u64,
    value: Mutex<T>,
    queued: AtomicUsize,
}

impl<T: Send> LockedResource<T> {
    pub fn new(value: T) -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            value: Mutex::new(value),
            queued: AtomicUsize::new(0),
        }
    }

    /// Number of units of work currently running or waiting.
    pub fn queue_len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_held_by_current_task(&self) -> bool {
        HELD_LOCKS
            .try_with(|held| held.contains(&self.id))
            .unwrap_or(false)
    }

    /// Runs `work` exclusively with shared access to the value.
    pub async fn with<R, F>(&self, work: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a T) -> BoxFuture<'a, R>,
    {
        let (_ticket, guard) = self.enter().await?;
        Ok(HELD_LOCKS.scope(self.held_ids(), work(&*guard)).await)
    }

    /// Runs `work` exclusively with mutable access to the value.
    pub async fn with_mut<R, F>(&self, work: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a mut T) -> BoxFuture<'a, R>,
    {
        let (_ticket, mut guard) = self.enter().await?;
        let held = self.held_ids();
        Ok(HELD_LOCKS.scope(held, work(&mut *guard)).await)
    }

    /// Runs `work` exclusively and replaces the value with its output.
    pub async fn update<F>(&self, work: F) -> Result<()>
    where
        F: for<'a> FnOnce(&'a T) -> BoxFuture<'a, T>,
    {
        let (_ticket, mut guard) = self.enter().await?;
        let next = HELD_LOCKS.scope(self.held_ids(), work(&*guard)).await;
        *guard = next;
        Ok(())
    }

    pub(crate) async fn enter(&self) -> Result<(QueueTicket<'_>, MutexGuard<'_, T>)> {
        if self.is_held_by_current_task() {
            return Err(SyncError::Reentrant { lock_id: self.id });
        }
        let ticket = QueueTicket::enter(&self.queued);
        let guard = self.value.lock().await;
        Ok((ticket, guard))
    }

    pub(crate) fn held_ids(&self) -> Vec<u64> {
        let mut held = HELD_LOCKS.try_with(Clone::clone).unwrap_or_default();
        held.push(self.id);
        held
    }
}

impl<T: Send + Default> Default for LockedResource<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// An async mutual-exclusion queue without a protected value.
pub struct Lock {
    inner: LockedResource<()>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            inner: LockedResource::new(()),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue_len()
    }

    pub fn is_held_by_current_task(&self) -> bool {
        self.inner.is_held_by_current_task()
    }

    /// Queues `work` behind everything already queued and runs it once it reaches the front.
    ///
    /// Work spawned onto *other* tasks does not inherit the holder's identity, so a spawned
    /// task that waits on this same lock while the holder awaits it still deadlocks.
    pub async fn acquire<R, F, Fut>(&self, work: F) -> Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let (_ticket, _guard) = self.inner.enter().await?;
        Ok(HELD_LOCKS.scope(self.inner.held_ids(), work()).await)
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}
