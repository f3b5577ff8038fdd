use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap<K> = HashMap<K, Arc<AsyncMutex<()>>>;

/// One async mutex per key, created on first use.
///
/// The outer map is only held while looking up or releasing the per-key
/// mutex, never across an await, so different keys never wait on each
/// other. An entry is dropped as soon as no holder or waiter refers to it.
pub(crate) struct KeyedLocks<K> {
    inner: Arc<Mutex<LockMap<K>>>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) async fn lock(&self, key: K) -> KeyGuard<K> {
        let slot = {
            let mut map = self.map();
            Arc::clone(map.entry(key.clone()).or_default())
        };
        KeyGuard {
            guard: Some(slot.lock_owned().await),
            key,
            locks: self.clone(),
        }
    }

    /// Number of keys currently locked or waited on.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map().len()
    }

    fn map(&self) -> MutexGuard<'_, LockMap<K>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holds the lock of one key. Releasing the last reference removes the entry.
pub(crate) struct KeyGuard<K: Eq + Hash + Clone> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: KeyedLocks<K>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters clone the entry under the map lock, so a count of one
        // means nobody else can reach it.
        let mut map = self.locks.map();
        if let Some(slot) = map.get(&self.key)
            && Arc::strong_count(slot) == 1
        {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::<String>::default();
        let _a = locks.lock("a".to_string()).await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b".to_string())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::<String>::default();
        let guard = locks.lock("a".to_string()).await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.lock("a".to_string())).await;
        assert!(blocked.is_err());

        drop(guard);
        let acquired =
            tokio::time::timeout(Duration::from_millis(100), locks.lock("a".to_string())).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_released_keys_are_reclaimed() {
        let locks = KeyedLocks::<u32>::default();
        for key in 0..1000 {
            let _guard = locks.lock(key).await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_entry_survives_while_waited_on() {
        let locks = KeyedLocks::<String>::default();
        let first = locks.lock("a".to_string()).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("a".to_string()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
