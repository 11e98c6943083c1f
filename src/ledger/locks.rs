//! Per-key async locks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// A map of lazily created async read/write locks, one per key.
///
/// Entries nobody holds or waits on are pruned whenever a new lock is handed out.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<RwLock<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn entry(&self, key: K) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key).or_default())
    }

    /// Exclusive access to `key`.
    pub async fn lock(&self, key: K) -> OwnedRwLockWriteGuard<()> {
        self.entry(key).await.write_owned().await
    }

    /// Shared access to `key`; excludes [`KeyedLocks::lock`] holders only.
    pub async fn lock_shared(&self, key: K) -> OwnedRwLockReadGuard<()> {
        self.entry(key).await.read_owned().await
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks: Arc<KeyedLocks<&'static str>> = Arc::new(KeyedLocks::new());
        let guard = locks.lock("a").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_are_independent() {
        let locks: KeyedLocks<&'static str> = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_shared_holders_coexist() {
        let locks: KeyedLocks<u8> = KeyedLocks::new();
        let _a = locks.lock_shared(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock_shared(1)).await;
        assert!(b.is_ok());
        let exclusive = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(exclusive.is_err());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks: KeyedLocks<u8> = KeyedLocks::new();
        for key in 0..10 {
            let _g = locks.lock(key).await;
        }
        let _last = locks.lock(42).await;
        assert_eq!(locks.len().await, 1);
    }
}
