use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::kv::{KvStore, get_json, put_json};
use crate::locker::KeyGuard;
use crate::record::Submitter;

pub const LINKAGE_BUCKET: &str = "linkage";

/// Identifies one build history: a submitter's runs of one lab in one course.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkageKey {
    pub course: String,
    pub submitter: Submitter,
    pub lab_number: u32,
}

impl LinkageKey {
    pub fn new(course: impl Into<String>, submitter: Submitter, lab_number: u32) -> Self {
        Self {
            course: course.into(),
            submitter,
            lab_number,
        }
    }

    fn head_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.course,
            self.submitter.key_part(),
            self.lab_number
        )
    }

    fn entry_key(&self, position: u64) -> String {
        format!("{}#{position}", self.head_key())
    }
}

/// The approved build of a lab, set by the approval action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedBuild {
    pub build_id: u64,
    pub push_time: DateTime<Utc>,
}

/// Head record of a history: latest build and entry count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkageHead {
    pub latest: Option<u64>,
    pub count: u64,
    #[serde(default)]
    pub approved: Option<ApprovedBuild>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkageEntry {
    build_id: u64,
}

/// Append-only build histories.
///
/// Entries are stored under `<head>#<n>` (1-based) and never rewritten; the
/// head holds the latest id so lookups do not scan. Mutations are only
/// consistent when made under [`LinkageStore::lock`] for the same key.
#[derive(Clone)]
pub struct LinkageStore {
    kv: Arc<dyn KvStore>,
}

impl LinkageStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Serialize access to one history. Histories of other keys stay free.
    pub async fn lock(&self, key: &LinkageKey) -> KeyGuard {
        self.kv.lock(LINKAGE_BUCKET, &key.head_key()).await
    }

    /// Head of the history; empty when no build was linked yet.
    pub async fn head(&self, key: &LinkageKey) -> StoreResult<LinkageHead> {
        Ok(get_json(self.kv.as_ref(), LINKAGE_BUCKET, &key.head_key())
            .await?
            .unwrap_or_default())
    }

    pub async fn last_build_id(&self, key: &LinkageKey) -> StoreResult<Option<u64>> {
        Ok(self.head(key).await?.latest)
    }

    /// Link `build_id` as the newest build. Caller holds [`LinkageStore::lock`].
    ///
    /// The entry is written before the head, so an interrupted append leaves
    /// the previous head intact and the orphan entry is overwritten next time.
    pub async fn append(&self, key: &LinkageKey, build_id: u64) -> StoreResult<LinkageHead> {
        let mut head = self.head(key).await?;
        let position = head.count + 1;
        put_json(
            self.kv.as_ref(),
            LINKAGE_BUCKET,
            &key.entry_key(position),
            &LinkageEntry { build_id },
        )
        .await?;

        head.count = position;
        head.latest = Some(build_id);
        put_json(self.kv.as_ref(), LINKAGE_BUCKET, &key.head_key(), &head).await?;
        Ok(head)
    }

    /// All linked build ids, oldest first.
    pub async fn history(&self, key: &LinkageKey) -> StoreResult<Vec<u64>> {
        let head = self.head(key).await?;
        let mut ids = Vec::new();
        for position in 1..=head.count {
            let entry: Option<LinkageEntry> =
                get_json(self.kv.as_ref(), LINKAGE_BUCKET, &key.entry_key(position)).await?;
            if let Some(entry) = entry {
                ids.push(entry.build_id);
            }
        }
        Ok(ids)
    }

    /// Record the approved build. Caller holds [`LinkageStore::lock`].
    pub async fn set_approved(
        &self,
        key: &LinkageKey,
        approved: ApprovedBuild,
    ) -> StoreResult<LinkageHead> {
        let mut head = self.head(key).await?;
        head.approved = Some(approved);
        put_json(self.kv.as_ref(), LINKAGE_BUCKET, &key.head_key(), &head).await?;
        Ok(head)
    }
}
