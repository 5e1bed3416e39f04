use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StoreError, StoreResult};
use crate::locker::{KeyGuard, KeyLocker};

/// Minimal persistence engine: blobs addressed by (bucket, key), one
/// monotonic sequence per bucket, and advisory per-key locks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value`, replacing any previous blob under the key.
    async fn put(&self, bucket: &str, key: &str, value: &[u8]) -> StoreResult<()>;

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Next value of the bucket's sequence, starting at 1.
    ///
    /// Linearizable: concurrent callers never observe the same value.
    async fn next_sequence(&self, bucket: &str) -> StoreResult<u64>;

    fn locker(&self) -> &KeyLocker;

    /// Lock `(bucket, key)` until the guard drops.
    async fn lock(&self, bucket: &str, key: &str) -> KeyGuard {
        self.locker().lock(bucket, key).await
    }
}

/// Reject names that cannot be used as a single path component.
pub fn validate_key(name: &str) -> StoreResult<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidKey(name.to_string()));
    }
    Ok(())
}

pub async fn put_json<T>(kv: &dyn KvStore, bucket: &str, key: &str, value: &T) -> StoreResult<()>
where
    T: Serialize + Sync + ?Sized,
{
    let blob = serde_json::to_vec(value)?;
    kv.put(bucket, key, &blob).await
}

pub async fn get_json<T: DeserializeOwned>(
    kv: &dyn KvStore,
    bucket: &str,
    key: &str,
) -> StoreResult<Option<T>> {
    match kv.get(bucket, key).await? {
        Some(blob) => Ok(Some(serde_json::from_slice(&blob)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_keys() {
        for key in ["42", "cs101:user:alice:3", "cs101:group:7:2#1", "buildresults"] {
            validate_key(key).unwrap();
        }
    }

    #[test]
    fn rejects_path_like_keys() {
        for key in ["", ".", "..", ".sequence", "a/b", "a\\b", "a\0b"] {
            assert!(
                matches!(validate_key(key), Err(StoreError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }
}
