use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Whether the dispatcher still accepts build requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Running,
    Draining,
    Stopped,
}

/// Contents of the status file.
#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    mode: DispatchMode,
    active_builds: usize,
    active_dispatch_ids: &'a BTreeSet<Uuid>,
    completed: u64,
    failed: u64,
    started_at: String,
    updated_at: String,
}

struct Board {
    mode: DispatchMode,
    active: BTreeSet<Uuid>,
    completed: u64,
    failed: u64,
}

/// Dispatcher bookkeeping, republished to a JSON file on every change.
///
/// Publishing is best effort: failures are logged and the in-memory state
/// stays authoritative.
pub struct StatusTracker {
    path: PathBuf,
    started_at: DateTime<Utc>,
    board: Mutex<Board>,
}

impl StatusTracker {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            started_at: Utc::now(),
            board: Mutex::new(Board {
                mode: DispatchMode::Running,
                active: BTreeSet::new(),
                completed: 0,
                failed: 0,
            }),
        }
    }

    pub async fn set_mode(&self, mode: DispatchMode) {
        let mut board = self.board.lock().await;
        board.mode = mode;
        self.publish(&board).await;
    }

    pub async fn add_build(&self, dispatch_id: Uuid) {
        let mut board = self.board.lock().await;
        board.active.insert(dispatch_id);
        self.publish(&board).await;
    }

    /// Retire a dispatched build and count how it ended.
    pub async fn finish_build(&self, dispatch_id: Uuid, succeeded: bool) {
        let mut board = self.board.lock().await;
        if !board.active.remove(&dispatch_id) {
            warn!(dispatch_id = %dispatch_id, "finished build was not tracked");
        }
        if succeeded {
            board.completed += 1;
        } else {
            board.failed += 1;
        }
        self.publish(&board).await;
    }

    pub async fn active_builds(&self) -> usize {
        self.board.lock().await.active.len()
    }

    pub async fn write_initial(&self) {
        let board = self.board.lock().await;
        self.publish(&board).await;
    }

    async fn publish(&self, board: &Board) {
        let snapshot = Snapshot {
            mode: board.mode,
            active_builds: board.active.len(),
            active_dispatch_ids: &board.active,
            completed: board.completed,
            failed: board.failed,
            started_at: self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let json = match serde_json::to_vec_pretty(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "status snapshot not serializable");
                return;
            }
        };

        // Readers never see a partial file.
        let staging = self.path.with_extension("json.tmp");
        let written = match tokio::fs::write(&staging, &json).await {
            Ok(()) => tokio::fs::rename(&staging, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(error = %e, path = %self.path.display(), "status file not updated");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn read_status(path: &std::path::Path) -> serde_json::Value {
        let content = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[tokio::test]
    async fn initial_status_is_running_and_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let tracker = StatusTracker::new(path.clone());

        tracker.write_initial().await;

        let status = read_status(&path);
        assert_eq!(status["mode"], "running");
        assert_eq!(status["active_builds"], 0);
        assert!(status["active_dispatch_ids"].as_array().unwrap().is_empty());
        assert_eq!(status["completed"], 0);
        assert_eq!(status["failed"], 0);
    }

    #[tokio::test]
    async fn drain_then_stop_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let tracker = StatusTracker::new(path.clone());

        tracker.set_mode(DispatchMode::Draining).await;
        assert_eq!(read_status(&path)["mode"], "draining");
        tracker.set_mode(DispatchMode::Stopped).await;
        assert_eq!(read_status(&path)["mode"], "stopped");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn active_ids_are_listed_until_finished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let tracker = StatusTracker::new(path.clone());

        let ok = Uuid::new_v4();
        let bad = Uuid::new_v4();
        tracker.add_build(ok).await;
        tracker.add_build(bad).await;
        let listed: BTreeSet<String> = read_status(&path)["active_dispatch_ids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|id| id.as_str().unwrap().to_string())
            .collect();
        assert_eq!(listed, BTreeSet::from([ok.to_string(), bad.to_string()]));

        tracker.finish_build(ok, true).await;
        tracker.finish_build(bad, false).await;

        let status = read_status(&path);
        assert_eq!(status["active_builds"], 0);
        assert_eq!(status["completed"], 1);
        assert_eq!(status["failed"], 1);
        assert_eq!(tracker.active_builds().await, 0);
    }
}
