use std::sync::Arc;

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::kv::{KvStore, get_json, put_json};
use crate::record::{BuildResult, Submitter};

pub const BUILD_BUCKET: &str = "buildresults";

/// Build records keyed by their decimal id.
#[derive(Clone)]
pub struct BuildStore {
    kv: Arc<dyn KvStore>,
}

impl BuildStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Allocate the next build id. Linearizable across concurrent callers.
    pub async fn next_build_id(&self) -> StoreResult<u64> {
        self.kv.next_sequence(BUILD_BUCKET).await
    }

    /// Allocate an id and return an empty record for it. Nothing is written.
    pub async fn new_build_result(
        &self,
        course: &str,
        submitter: &Submitter,
        lab_number: u32,
    ) -> StoreResult<BuildResult> {
        let id = self.next_build_id().await?;
        debug!(build_id = id, course, %submitter, lab_number, "allocated build id");
        Ok(BuildResult::new(id, course, submitter, lab_number))
    }

    /// Write `result` under its id, replacing any earlier write.
    pub async fn save(&self, result: &BuildResult) -> StoreResult<()> {
        put_json(self.kv.as_ref(), BUILD_BUCKET, &result.id.to_string(), result).await
    }

    pub async fn get_build_result(&self, id: u64) -> StoreResult<BuildResult> {
        let key = id.to_string();
        get_json(self.kv.as_ref(), BUILD_BUCKET, &key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                bucket: BUILD_BUCKET.to_string(),
                key,
            })
    }

    /// Overwrite the status of a persisted build.
    pub async fn set_status(&self, id: u64, status: &str) -> StoreResult<BuildResult> {
        let _guard = self.kv.lock(BUILD_BUCKET, &id.to_string()).await;
        let mut result = self.get_build_result(id).await?;
        result.status = status.to_string();
        self.save(&result).await?;
        Ok(result)
    }
}
