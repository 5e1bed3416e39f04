//! Durable build records on top of a minimal key-value engine.
//!
//! [`KvStore`] is the engine contract (blobs, sequences, per-key locks).
//! [`BuildStore`] and [`LinkageStore`] layer the build record and the
//! per-submitter build history on top of it.

mod error;
mod file;
mod kv;
mod linkage;
mod locker;
mod memory;
mod record;
mod score;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use kv::{KvStore, get_json, put_json, validate_key};
pub use linkage::{ApprovedBuild, LINKAGE_BUCKET, LinkageHead, LinkageKey, LinkageStore};
pub use locker::{KeyGuard, KeyLocker};
pub use memory::MemoryStore;
pub use record::{
    APPROVED_STATUS, BuildResult, DEFAULT_STATUS, LogRedactor, NO_GROUP, NO_USER, Redacted,
    SANITIZED, Submitter,
};
pub use score::{TestScore, parse_score_line, total_score};
pub use store::{BUILD_BUCKET, BuildStore};
