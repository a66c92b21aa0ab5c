//! Keyed exclusive locks for read-modify-write sequences.
//!
//! One async mutex per key, created on first use. Holding the guard for key `k`
//! serializes every other holder of `k` and leaves all other keys untouched.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

/// Map of per-key async mutexes
#[derive(Debug)]
pub struct RecordLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> Default for RecordLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> RecordLocks<K>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty lock map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<K, Arc<tokio::sync::Mutex<()>>>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// The returned guard releases the key when dropped.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut table = self.table();
            // Forget keys nobody holds or waits on
            table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            Arc::clone(table.entry(key.clone()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of keys currently tracked
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.table().len()
    }
}
