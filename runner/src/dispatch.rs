use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::daemon::Daemon;
use crate::error::{RunnerError, RunnerResult};
use crate::options::BuildOptions;
use crate::status::{DispatchMode, StatusTracker};

/// Bounded pool of supervised builds.
///
/// `dispatch` waits for a free slot, so callers feeding requests in order
/// get backpressure instead of an unbounded queue.
pub struct Dispatcher {
    daemon: Daemon,
    semaphore: Arc<Semaphore>,
    builds: JoinSet<()>,
    status: Arc<StatusTracker>,
}

impl Dispatcher {
    pub fn new(daemon: Daemon, max_concurrent: usize, status: Arc<StatusTracker>) -> Self {
        Self {
            daemon,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            builds: JoinSet::new(),
            status,
        }
    }

    pub fn status(&self) -> &Arc<StatusTracker> {
        &self.status
    }

    /// Builds spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.builds.len()
    }

    /// Validate `opts` and start a supervised build once a slot is free.
    pub async fn dispatch(&mut self, opts: BuildOptions) -> RunnerResult<Uuid> {
        opts.validate()?;
        self.reap();

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RunnerError::Internal("dispatch semaphore closed".into()))?;

        let dispatch_id = Uuid::new_v4();
        self.status.add_build(dispatch_id).await;
        info!(
            dispatch_id = %dispatch_id,
            course = %opts.org,
            submitter = %opts.submitter(),
            lab = opts.lab_number,
            "build dispatched"
        );

        let daemon = self.daemon.clone();
        let status = Arc::clone(&self.status);
        self.builds.spawn(async move {
            let succeeded = daemon.supervise(opts).await.is_ok();
            status.finish_build(dispatch_id, succeeded).await;
            drop(permit);
        });
        Ok(dispatch_id)
    }

    /// Stop accepting work and wait for every dispatched build.
    pub async fn drain(mut self) {
        self.status.set_mode(DispatchMode::Draining).await;
        let remaining = self.builds.len();
        if remaining > 0 {
            info!(remaining, "waiting for running builds to finish");
        }
        while let Some(result) = self.builds.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "build task panicked during drain");
            }
        }
        self.status.set_mode(DispatchMode::Stopped).await;
        info!("dispatcher stopped");
    }

    fn reap(&mut self) {
        while let Some(result) = self.builds.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "build task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use buildstore::MemoryStore;
    use sandbox::testing::{ExecScript, ScriptedConnector, ScriptedRuntime};

    use super::*;
    use crate::daemon::DaemonSettings;
    use crate::options::tests::alice;
    use crate::status::tests::read_status;

    fn dispatcher(
        runtime: &Arc<ScriptedRuntime>,
        max_concurrent: usize,
        dir: &tempfile::TempDir,
    ) -> Dispatcher {
        let daemon = Daemon::new(
            Arc::new(ScriptedConnector::new(runtime.clone())),
            Arc::new(MemoryStore::new()),
            DaemonSettings::default(),
        );
        let status = Arc::new(StatusTracker::new(dir.path().join("status.json")));
        Dispatcher::new(daemon, max_concurrent, status)
    }

    fn student(name: &str) -> BuildOptions {
        BuildOptions {
            user: name.into(),
            ..alice()
        }
    }

    #[tokio::test]
    async fn invalid_options_are_rejected_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new());
        let mut dispatcher = dispatcher(&runtime, 2, &dir);

        let mut opts = alice();
        opts.group = Some(3);
        let err = dispatcher.dispatch(opts).await.unwrap_err();
        assert!(matches!(err, RunnerError::Options(_)));
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn drain_waits_for_builds_and_records_counts() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.script("test.sh", ExecScript::output("ok\n").delay(Duration::from_millis(20)));
        let mut dispatcher = dispatcher(&runtime, 2, &dir);
        let status_path = dir.path().join("status.json");

        for name in ["alice", "bob", "carol"] {
            dispatcher.dispatch(student(name)).await.unwrap();
        }
        dispatcher.drain().await;

        let status = read_status(&status_path);
        assert_eq!(status["mode"], "stopped");
        assert_eq!(status["completed"], 3);
        assert_eq!(status["failed"], 0);
        assert_eq!(status["active_builds"], 0);
        assert_eq!(runtime.live_sandboxes(), 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.script("test.sh", ExecScript::default().delay(Duration::from_millis(20)));
        let mut dispatcher = dispatcher(&runtime, 1, &dir);

        for name in ["alice", "bob", "carol"] {
            dispatcher.dispatch(student(name)).await.unwrap();
        }
        dispatcher.drain().await;

        assert_eq!(runtime.max_concurrent_execs(), 1);
        assert_eq!(runtime.removed().len(), 3);
    }

    #[tokio::test]
    async fn failed_builds_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptedRuntime::new().fail_create());
        let mut dispatcher = dispatcher(&runtime, 2, &dir);
        let status_path = dir.path().join("status.json");

        dispatcher.dispatch(alice()).await.unwrap();
        dispatcher.drain().await;

        let status = read_status(&status_path);
        assert_eq!(status["failed"], 1);
        assert_eq!(status["completed"], 0);
    }
}
