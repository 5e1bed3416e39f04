use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use buildstore::{
    APPROVED_STATUS, ApprovedBuild, BuildResult, BuildStore, KvStore, LinkageKey, LinkageStore,
};
use futures_util::FutureExt;
use sandbox::{Connector, ExecLocks, ExecScope, SandboxManager};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{DEFAULT_CLONE_HOST, DEFAULT_ENDPOINT, DEFAULT_IMAGE, RunnerConfig};
use crate::error::{BuildError, BuildState, RunnerError, RunnerResult};
use crate::options::BuildOptions;
use crate::pipeline::{build_commands, run_commands};
use crate::retry::{RetryConfig, calculate_backoff};

/// Settings shared by every build a [`Daemon`] runs.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonSettings {
    pub endpoint: String,
    pub image: String,
    pub clone_host: String,
    pub exec_scope: ExecScope,
    pub exec_timeout: Option<Duration>,
    pub retry: RetryConfig,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            clone_host: DEFAULT_CLONE_HOST.to_string(),
            exec_scope: ExecScope::default(),
            exec_timeout: None,
            retry: RetryConfig::default(),
        }
    }
}

impl From<&RunnerConfig> for DaemonSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            image: config.image.clone(),
            clone_host: config.clone_host.clone(),
            exec_scope: config.exec_scope,
            exec_timeout: config.exec_timeout(),
            retry: config.retry.clone(),
        }
    }
}

/// A build that reached the end of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub build_id: u64,
    pub state: BuildState,
    pub total_score: u32,
}

/// Runs builds end to end: sandbox, pipeline, record, history.
///
/// Cheap to clone; clones share the store, the exec locks and the connector.
#[derive(Clone)]
pub struct Daemon {
    connector: Arc<dyn Connector>,
    builds: BuildStore,
    linkage: LinkageStore,
    exec_locks: ExecLocks,
    settings: Arc<DaemonSettings>,
}

impl Daemon {
    pub fn new(connector: Arc<dyn Connector>, kv: Arc<dyn KvStore>, settings: DaemonSettings) -> Self {
        Self {
            connector,
            builds: BuildStore::new(kv.clone()),
            linkage: LinkageStore::new(kv),
            exec_locks: ExecLocks::new(settings.exec_scope),
            settings: Arc::new(settings),
        }
    }

    pub fn builds(&self) -> &BuildStore {
        &self.builds
    }

    pub fn linkage(&self) -> &LinkageStore {
        &self.linkage
    }

    /// Launch a supervised build in the background.
    pub fn start_build(&self, opts: BuildOptions) -> JoinHandle<Result<BuildOutcome, BuildError>> {
        let daemon = self.clone();
        tokio::spawn(async move { daemon.supervise(opts).await })
    }

    /// Run a build in its own task, log how it ended, and retry failures
    /// that happened before anything was persisted.
    pub async fn supervise(&self, opts: BuildOptions) -> Result<BuildOutcome, BuildError> {
        let retry = &self.settings.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let daemon = self.clone();
            let task_opts = opts.clone();
            let joined = tokio::spawn(async move { daemon.run_build(&task_opts).await }).await;
            let result = joined.unwrap_or_else(|e| Err(BuildError::Fault(format!("build task: {e}"))));

            match result {
                Ok(outcome) => {
                    info!(
                        build_id = outcome.build_id,
                        course = %opts.org,
                        submitter = %opts.submitter(),
                        lab = opts.lab_number,
                        total_score = outcome.total_score,
                        state = %outcome.state,
                        "build complete"
                    );
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = calculate_backoff(attempt - 1, retry);
                    warn!(
                        course = %opts.org,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "build failed before persisting, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(
                        course = %opts.org,
                        submitter = %opts.submitter(),
                        lab = opts.lab_number,
                        build_id = e.build_id(),
                        state = %e.state(),
                        attempt,
                        error = %e,
                        "build failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// One build attempt. The sandbox is removed before returning, whatever
    /// happened after it was created, panics included.
    pub async fn run_build(&self, opts: &BuildOptions) -> Result<BuildOutcome, BuildError> {
        let runtime = self
            .connector
            .connect(&self.settings.endpoint)
            .await
            .map_err(BuildError::Connection)?;

        let mut manager = SandboxManager::new(runtime, self.exec_locks.next())
            .with_exec_timeout(self.settings.exec_timeout);
        manager
            .create(&self.settings.image)
            .await
            .map_err(BuildError::Create)?;

        let outcome = AssertUnwindSafe(self.run_in_sandbox(&mut manager, opts))
            .catch_unwind()
            .await;

        if let Err(e) = manager.remove().await {
            warn!(course = %opts.org, error = %e, "sandbox removal failed");
        }

        outcome.unwrap_or_else(|panic| Err(BuildError::Fault(panic_message(&*panic))))
    }

    async fn run_in_sandbox(
        &self,
        manager: &mut SandboxManager,
        opts: &BuildOptions,
    ) -> Result<BuildOutcome, BuildError> {
        let redactor = opts.redactor();
        let mut result = self
            .builds
            .new_build_result(&opts.org, &opts.submitter(), opts.lab_number)
            .await
            .map_err(BuildError::Allocation)?;
        result.head_commit_id = opts.head_commit_id.clone();
        result.head_commit_text = opts.head_commit_text.clone();

        let start = format!("Running tests for: {}/{}", opts.org, opts.user_repo);
        info!(build_id = result.id, sandbox = ?manager.sandbox().map(|s| &s.id), "{start}");
        result.add(&start, &redactor);

        let commands = build_commands(opts, &self.settings.clone_host);
        let report = run_commands(manager, &mut result, &redactor, &commands).await;
        result.done();
        info!(
            build_id = result.id,
            passes = result.num_passes,
            fails = result.num_fails,
            build_failures = result.num_build_failures,
            failed_steps = report.failures(),
            halted_at = report.halted_at,
            build_time_ms = result.build_time_ms,
            "pipeline finished"
        );

        self.persist(&mut result, opts).await
    }

    /// Reconcile with the previous build of the same history, save the
    /// record and link it, all under the history's lock.
    async fn persist(
        &self,
        result: &mut BuildResult,
        opts: &BuildOptions,
    ) -> Result<BuildOutcome, BuildError> {
        let build_id = result.id;
        let key = opts.linkage_key();
        let _guard = self.linkage.lock(&key).await;

        match self.linkage.last_build_id(&key).await {
            Ok(Some(prior_id)) => match self.builds.get_build_result(prior_id).await {
                Ok(prior) => reconcile(result, &prior, opts.is_push),
                Err(e) => warn!(build_id, prior_id, error = %e, "prior build unreadable, not reconciling"),
            },
            Ok(None) => {}
            Err(e) => warn!(build_id, error = %e, "build history unreadable, not reconciling"),
        }

        self.builds
            .save(result)
            .await
            .map_err(|source| BuildError::Persistence { build_id, source })?;
        info!(build_id, course = %opts.org, status = %result.status, "build persisted");

        let head = self
            .linkage
            .append(&key, build_id)
            .await
            .map_err(|source| BuildError::Linkage { build_id, source })?;
        info!(build_id, history_len = head.count, "build linked");

        Ok(BuildOutcome {
            build_id,
            state: BuildState::Linked,
            total_score: result.total_score,
        })
    }

    /// Mark the latest build of a history as approved.
    pub async fn approve_latest(&self, key: &LinkageKey) -> RunnerResult<BuildResult> {
        let _guard = self.linkage.lock(key).await;
        let build_id = self
            .linkage
            .last_build_id(key)
            .await?
            .ok_or_else(|| RunnerError::NoBuilds(describe(key)))?;

        let result = self.builds.set_status(build_id, APPROVED_STATUS).await?;
        self.linkage
            .set_approved(
                key,
                ApprovedBuild {
                    build_id,
                    push_time: result.push_time,
                },
            )
            .await?;
        info!(build_id, history = %describe(key), "build approved");
        Ok(result)
    }
}

/// Carry state over from the previous build of the same history.
///
/// Status always carries over. A manual rerun also keeps the previous push
/// time, so only real pushes move it.
pub fn reconcile(result: &mut BuildResult, prior: &BuildResult, is_push: bool) {
    result.status = prior.status.clone();
    if !is_push {
        result.push_time = prior.push_time;
    }
}

pub fn describe(key: &LinkageKey) -> String {
    format!("{} {} lab {}", key.course, key.submitter, key.lab_number)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}
