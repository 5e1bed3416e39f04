use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

const SHARDS: usize = 16;

type Table = HashMap<String, Arc<Mutex<()>>>;

/// Per-(bucket, key) async locks.
///
/// Entries are created on first use and evicted when the last guard for a
/// key drops, so the table only holds keys that are currently locked or
/// awaited. A waiter cancelled while queued leaves its entry behind until the
/// key is locked again.
#[derive(Debug, Clone, Default)]
pub struct KeyLocker {
    shards: Arc<[StdMutex<Table>; SHARDS]>,
}

impl KeyLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock on `(bucket, key)`.
    pub async fn lock(&self, bucket: &str, key: &str) -> KeyGuard {
        let mut guard = self.entry(bucket, key);
        let acquired = Arc::clone(&guard.mutex).lock_owned().await;
        guard.held = Some(acquired);
        guard
    }

    /// Take the lock on `(bucket, key)` only if nobody holds it.
    pub fn try_lock(&self, bucket: &str, key: &str) -> Option<KeyGuard> {
        let mut guard = self.entry(bucket, key);
        let acquired = Arc::clone(&guard.mutex).try_lock_owned().ok()?;
        guard.held = Some(acquired);
        Some(guard)
    }

    /// Number of keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| lock_table(shard).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, bucket: &str, key: &str) -> KeyGuard {
        let id = format!("{bucket}/{key}");
        let mutex = Arc::clone(lock_table(self.shard(&id)).entry(id.clone()).or_default());
        KeyGuard {
            locker: self.clone(),
            id,
            mutex,
            held: None,
        }
    }

    #[allow(clippy::indexing_slicing)]
    fn shard(&self, id: &str) -> &StdMutex<Table> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        // reduced modulo SHARDS, always in bounds
        &self.shards[(hasher.finish() % SHARDS as u64) as usize]
    }

    fn release(&self, id: &str, mutex: &Arc<Mutex<()>>) {
        let mut table = lock_table(self.shard(id));
        // table + the releasing guard: nobody else holds or awaits this key
        let idle = table
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry, mutex) && Arc::strong_count(entry) == 2);
        if idle {
            table.remove(id);
        }
    }
}

fn lock_table(shard: &StdMutex<Table>) -> MutexGuard<'_, Table> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a key lock until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    locker: KeyLocker,
    id: String,
    mutex: Arc<Mutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    /// `bucket/key` this guard locks.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // the owned guard keeps its own reference to the mutex
        drop(self.held.take());
        self.locker.release(&self.id, &self.mutex);
    }
}
