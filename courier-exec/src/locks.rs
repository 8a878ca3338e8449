//! Per-entity mutual exclusion.
//!
//! Services hold the lock of an order (or account) across
//! read → idempotency check → commit. Bulk operations take every lock in
//! ascending id order so two batches never wait on each other in a cycle.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Idle entries are pruned once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Held lock on one key
pub type KeyGuard = OwnedMutexGuard<()>;

/// Table of async mutexes keyed by entity id.
#[derive(Default)]
pub struct KeyedLocks {
    table: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: Uuid) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.len() > PRUNE_THRESHOLD {
            table.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        table.entry(key).or_default().clone()
    }

    /// Wait for the lock on `key`.
    pub async fn lock(&self, key: Uuid) -> KeyGuard {
        self.slot(key).lock_owned().await
    }

    /// Wait for the locks on all `keys`, taken in ascending order.
    /// Duplicate keys are locked once.
    pub async fn lock_many(&self, keys: impl IntoIterator<Item = Uuid>) -> Vec<KeyGuard> {
        let ordered: BTreeSet<Uuid> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// No keys tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let key = Uuid::now_v7();

        let guard = locks.lock(key).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(key).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(Uuid::now_v7()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Uuid::now_v7())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_lock_many_dedups() {
        let locks = KeyedLocks::new();
        let key = Uuid::now_v7();
        let guards = locks.lock_many([key, key, Uuid::now_v7()]).await;
        assert_eq!(guards.len(), 2);
        assert_eq!(locks.len(), 2);
    }
}
