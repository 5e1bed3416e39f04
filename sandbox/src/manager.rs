use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, SandboxError};
use crate::lock::ExecLock;
use crate::runtime::Runtime;
use crate::types::{IoStreams, SandboxHandle, SandboxState};

/// Terminal size applied when attaching interactively.
pub const TTY_ROWS: u16 = 20;
pub const TTY_COLS: u16 = 20;

/// Owns at most one sandbox on a runtime and drives its lifecycle.
///
/// Every command goes through [`SandboxManager::exec`], which holds the
/// manager's [`ExecLock`] for the duration of the command. Whether that lock
/// is private to this manager or shared process-wide is decided by whoever
/// hands it out (see [`crate::ExecLocks`]).
pub struct SandboxManager {
    runtime: Arc<dyn Runtime>,
    lock: ExecLock,
    exec_timeout: Option<Duration>,
    sandbox: Option<SandboxHandle>,
    state: SandboxState,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn Runtime>, lock: ExecLock) -> Self {
        Self {
            runtime,
            lock,
            exec_timeout: None,
            sandbox: None,
            state: SandboxState::Absent,
        }
    }

    /// Abandon any command that runs longer than `timeout`.
    ///
    /// Only the runtime's client side is stopped; the process inside the
    /// sandbox keeps running until the sandbox is removed. `None` waits
    /// forever: a command that never exits keeps the exec lock.
    pub fn with_exec_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn sandbox(&self) -> Option<&SandboxHandle> {
        self.sandbox.as_ref()
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    /// Create a sandbox from `image`, replacing (removing) any sandbox this
    /// manager already owns.
    pub async fn create(&mut self, image: &str) -> Result<&SandboxHandle> {
        if let Some(previous) = &self.sandbox {
            debug!(id = %previous.id, "replacing existing sandbox");
            self.remove().await?;
        }

        let id = self.runtime.create(image).await?;
        info!(id = %id, image, runtime = self.runtime.name(), "sandbox created");
        self.state = SandboxState::Created;
        Ok(&*self.sandbox.insert(SandboxHandle {
            id,
            image: image.to_string(),
        }))
    }

    /// Start the sandbox and attach `streams` to its main process.
    ///
    /// Diagnostic mode only; builds use [`SandboxManager::exec`].
    pub async fn attach(&mut self, streams: IoStreams<'_>) -> Result<()> {
        let id = self.running_id().await?;

        match self.runtime.resize_tty(&id, TTY_ROWS, TTY_COLS).await {
            Ok(true) => debug!(id = %id, rows = TTY_ROWS, cols = TTY_COLS, "tty resized"),
            Ok(false) => debug!(id = %id, "tty resize not supported by runtime"),
            Err(e) => warn!(id = %id, error = %e, "tty resize failed"),
        }

        self.runtime.attach(&id, streams).await
    }

    /// Run `cmd` inside the sandbox, starting it first if needed.
    ///
    /// Waits for the exec lock; returns once the command has exited.
    pub async fn exec(&mut self, cmd: &str, streams: IoStreams<'_>) -> Result<()> {
        let _guard = self.lock.acquire().await;
        let id = self.running_id().await?;

        let run = self.runtime.exec(&id, cmd, streams);
        match self.exec_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| SandboxError::Timeout(limit))?,
            None => run.await,
        }
    }

    /// Kill the sandbox's processes. No-op without a sandbox.
    pub async fn kill(&mut self) -> Result<()> {
        let Some(sandbox) = &self.sandbox else {
            return Ok(());
        };
        self.runtime.kill(&sandbox.id).await?;
        self.state = SandboxState::Created;
        Ok(())
    }

    /// Force-remove the sandbox. No-op without a sandbox.
    ///
    /// The reference is cleared only once the runtime confirms removal, so a
    /// failed removal can be retried.
    pub async fn remove(&mut self) -> Result<()> {
        let Some(sandbox) = &self.sandbox else {
            return Ok(());
        };
        self.runtime.remove(&sandbox.id).await?;
        info!(id = %sandbox.id, "sandbox removed");
        self.sandbox = None;
        self.state = SandboxState::Removed;
        Ok(())
    }

    async fn running_id(&mut self) -> Result<String> {
        let sandbox = self.sandbox.as_ref().ok_or(SandboxError::NoSandbox)?;
        if self.state != SandboxState::Running {
            self.runtime.start(&sandbox.id).await?;
            self.state = SandboxState::Running;
        }
        Ok(sandbox.id.clone())
    }
}
