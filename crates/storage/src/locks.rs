//! Per-key async mutual exclusion.
//!
//! Entries are created on first use and dropped when the last holder or
//! waiter releases them, so the table only grows with concurrently active keys.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// A table of async mutexes keyed by string.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: Arc<LockTable>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedLockGuard {
        // The shard guard from `entry` is released at the end of this statement,
        // before the await below.
        let mutex = self.table.entry(key.to_string()).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        KeyedLockGuard {
            key: key.to_string(),
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.table.len()
    }
}

impl std::fmt::Debug for KeyedLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("active_keys", &self.table.len())
            .finish()
    }
}

/// Exclusive access to one key. Released on drop.
pub struct KeyedLockGuard {
    key: String,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        // Release the mutex (and its Arc clone) first. `remove_if` holds the
        // shard lock, and new lockers clone under that same lock, so a count
        // of one means nobody else can reach this entry.
        drop(self.guard.take());
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
