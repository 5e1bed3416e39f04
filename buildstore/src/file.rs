use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::fcntl::{Flock, FlockArg};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::kv::{KvStore, validate_key};
use crate::locker::KeyLocker;

const SEQUENCE_FILE: &str = ".sequence";

/// [`KvStore`] on a directory tree: `root/<bucket>/<key>.json`.
///
/// Writes go to a temp file in the bucket directory and are renamed into
/// place, so readers see either the old or the new blob. Each bucket's
/// sequence lives in `root/<bucket>/.sequence` and is advanced under an
/// exclusive `flock`, which keeps allocation linearizable across processes
/// sharing the directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    locker: KeyLocker,
    // keeps queued allocations off the blocking pool; flock does the real work
    sequence: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locker: KeyLocker::new(),
            sequence: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> StoreResult<PathBuf> {
        validate_key(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn key_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn put(&self, bucket: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.key_path(bucket, key)?;
        let dir = self.bucket_dir(bucket)?;
        tokio::fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(error = %cleanup, path = %tmp.display(), "failed to remove temp file");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.key_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn next_sequence(&self, bucket: &str) -> StoreResult<u64> {
        let dir = self.bucket_dir(bucket)?;
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(SEQUENCE_FILE);

        let _queued = self.sequence.lock().await;
        let next = tokio::task::spawn_blocking(move || advance_sequence(&path))
            .await
            .map_err(|e| StoreError::Sequence(format!("sequence task: {e}")))??;
        debug!(bucket, value = next, "sequence advanced");
        Ok(next)
    }

    fn locker(&self) -> &KeyLocker {
        &self.locker
    }
}

/// Read, increment and rewrite the counter in `path` while holding an
/// exclusive flock on it.
fn advance_sequence(path: &Path) -> StoreResult<u64> {
    let file = std::fs::File::options()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    let mut file = Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_file, e)| StoreError::Sequence(format!("flock {}: {e}", path.display())))?;

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let current = match content.trim() {
        "" => 0,
        value => value.parse::<u64>().map_err(|e| {
            StoreError::Sequence(format!("corrupt sequence in {}: {e}", path.display()))
        })?,
    };
    let next = current
        .checked_add(1)
        .ok_or_else(|| StoreError::Sequence(format!("sequence exhausted in {}", path.display())))?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(next.to_string().as_bytes())?;
    file.sync_data()?;
    Ok(next)
}
