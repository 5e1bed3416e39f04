use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::kv::{KvStore, validate_key};
use crate::locker::KeyLocker;

type Buckets = HashMap<String, HashMap<String, Vec<u8>>>;

/// In-process [`KvStore`]. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<Buckets>,
    sequences: Mutex<HashMap<String, u64>>,
    locker: KeyLocker,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the last issued value of a bucket's sequence.
    pub fn seed_sequence(&self, bucket: &str, value: u64) {
        lock(&self.sequences).insert(bucket.to_string(), value);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, bucket: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(bucket)?;
        validate_key(key)?;
        lock(&self.buckets)
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(bucket)?;
        validate_key(key)?;
        Ok(lock(&self.buckets)
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn next_sequence(&self, bucket: &str) -> StoreResult<u64> {
        validate_key(bucket)?;
        let mut sequences = lock(&self.sequences);
        let next = sequences.entry(bucket.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    fn locker(&self) -> &KeyLocker {
        &self.locker
    }
}
