use crate::{Lock, Result};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// One [`Lock`] per key, created on first use and dropped once nobody waits on it.
///
/// Distinct keys never contend with each other, and memory stays bounded by the number of
/// keys currently in use rather than by every key ever seen.
pub struct KeyedLock<K> {
    locks: Mutex<HashMap<K, Arc<Lock>>>,
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys that currently have a live lock.
    pub fn active_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn acquire<R, F, Fut>(&self, key: K, work: F) -> Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let entry = KeyEntry::checkout(self, key);
        entry.lock.acquire(work).await
    }
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A checked-out per-key lock. The map entry is removed when the last checkout drops.
struct KeyEntry<'a, K>
where
    K: Eq + Hash + Clone,
{
    owner: &'a KeyedLock<K>,
    key: K,
    lock: Arc<Lock>,
}

impl<'a, K> KeyEntry<'a, K>
where
    K: Eq + Hash + Clone,
{
    fn checkout(owner: &'a KeyedLock<K>, key: K) -> Self {
        let mut locks = owner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Lock::new()))
            .clone();
        Self { owner, key, lock }
    }
}

impl<K> Drop for KeyEntry<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        let mut locks = self
            .owner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Checkouts clone the Arc under the map mutex, so a count of two (map + us) means
        // nobody else is queued on this key.
        let idle = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(&self.key);
        }
    }
}
