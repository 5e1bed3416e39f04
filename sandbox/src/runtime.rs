use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::IoStreams;

/// Lifecycle contract a container runtime must satisfy.
///
/// Implementations address sandboxes by the opaque id returned from
/// [`Runtime::create`]. Serializing commands is the caller's job (see
/// [`crate::SandboxManager`]); a runtime may be driven by many managers at once.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Human-readable backend name (e.g. "docker").
    fn name(&self) -> &str;

    /// Create a stopped sandbox from `image` and return its id.
    async fn create(&self, image: &str) -> Result<String>;
    /// Start the sandbox. Starting an already running sandbox is not an error.
    async fn start(&self, id: &str) -> Result<()>;
    /// Attach the given streams to the sandbox's main process until it exits.
    async fn attach(&self, id: &str, streams: IoStreams<'_>) -> Result<()>;
    /// Resize the sandbox pseudo-terminal.
    ///
    /// Returns `Ok(false)` when the backend has no way to do so.
    async fn resize_tty(&self, _id: &str, _rows: u16, _cols: u16) -> Result<bool> {
        Ok(false)
    }
    async fn kill(&self, id: &str) -> Result<()>;
    /// Force-remove the sandbox together with its volumes.
    async fn remove(&self, id: &str) -> Result<()>;
    /// Run `cmd` through a shell inside a running sandbox.
    ///
    /// A non-zero exit is reported as [`crate::SandboxError::ExitStatus`];
    /// output written before the exit has already reached `streams`.
    async fn exec(&self, id: &str, cmd: &str, streams: IoStreams<'_>) -> Result<()>;
}

/// Entry point to a runtime backend.
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;
    /// Open a client for the runtime listening at `endpoint`.
    ///
    /// Fails with [`crate::SandboxError::Connection`] when the runtime is unreachable.
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Runtime>>;
}
