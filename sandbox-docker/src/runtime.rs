use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use sandbox::{IoStreams, Runtime, SandboxError};
use tokio::io::AsyncRead;
use tokio::process::Child;
use tracing::{debug, trace};

use crate::command::{self, CommandError};

/// Drives sandboxes on one docker daemon.
///
/// Sandboxes are containers created with a tty and an open stdin running
/// `/bin/bash`, so they stay up until removed. Commands run through
/// `docker exec` with `/bin/sh -c`.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: PathBuf,
    endpoint: String,
}

impl DockerRuntime {
    pub fn new(binary: PathBuf, endpoint: String) -> Self {
        Self { binary, endpoint }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn run(&self, args: &[&str]) -> Result<String, CommandError> {
        command::run(&self.binary, &self.endpoint, args).await
    }

    /// Spawn a streaming client and pump `streams` through it until it exits.
    async fn stream(&self, args: &[&str], streams: IoStreams<'_>) -> Result<ExitStatus, SandboxError> {
        let (mut command, cmd_display) = command::docker(&self.binary, &self.endpoint, args);
        trace!(command = %cmd_display, "stream");

        let stdin = if streams.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut child = command
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::ExecFailed(format!("{cmd_display}: {e}")))?;

        pump(&mut child, streams).await?;
        Ok(child.wait().await?)
    }
}

/// Copy child output into the caller's writers and caller input into the
/// child until the child closes its output.
///
/// Feeding stops once output is drained; dropping the pipe closes the
/// child's stdin.
async fn pump(child: &mut Child, streams: IoStreams<'_>) -> Result<(), SandboxError> {
    let IoStreams {
        stdin,
        stdout,
        stderr,
    } = streams;
    let mut child_out = child
        .stdout
        .take()
        .ok_or_else(|| SandboxError::ExecFailed("child stdout not captured".into()))?;
    let mut child_err = child
        .stderr
        .take()
        .ok_or_else(|| SandboxError::ExecFailed("child stderr not captured".into()))?;
    let child_in = child.stdin.take();

    let drain = async {
        tokio::try_join!(
            tokio::io::copy(&mut child_out, stdout),
            tokio::io::copy(&mut child_err, stderr),
        )
    };
    let feed = feed_stdin(stdin, child_in);
    tokio::pin!(drain, feed);

    let mut fed = false;
    loop {
        tokio::select! {
            result = &mut feed, if !fed => {
                fed = true;
                if let Err(e) = result {
                    debug!(error = %e, "stdin forwarding stopped");
                }
            }
            result = &mut drain => {
                result?;
                return Ok(());
            }
        }
    }
}

async fn feed_stdin(
    source: Option<&mut (dyn AsyncRead + Send + Unpin)>,
    sink: Option<tokio::process::ChildStdin>,
) -> std::io::Result<()> {
    let (Some(source), Some(mut sink)) = (source, sink) else {
        return Ok(());
    };
    match tokio::io::copy(source, &mut sink).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
    }
}

fn check_exit(status: ExitStatus) -> Result<(), SandboxError> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(SandboxError::ExitStatus { code }),
        None => Err(SandboxError::ExecFailed(format!(
            "process terminated without exit code: {status}"
        ))),
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create(&self, image: &str) -> Result<String, SandboxError> {
        let id = self
            .run(&["create", "--interactive", "--tty", image, "/bin/bash"])
            .await
            .map_err(|e| SandboxError::CreationFailed(e.to_string()))?;
        if id.is_empty() {
            return Err(SandboxError::CreationFailed(
                "docker create returned no container id".into(),
            ));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), SandboxError> {
        self.run(&["start", id])
            .await
            .map_err(|e| SandboxError::StartFailed(e.to_string()))?;
        Ok(())
    }

    /// With stdin, the session is a shell started by `docker exec
    /// --interactive`: `docker attach` rejects piped input on a tty
    /// container. Without stdin, follows the main process output.
    async fn attach(&self, id: &str, streams: IoStreams<'_>) -> Result<(), SandboxError> {
        let args: [&str; 4] = if streams.stdin.is_some() {
            ["exec", "--interactive", id, "/bin/bash"]
        } else {
            ["attach", "--no-stdin", "--sig-proxy=false", id]
        };
        let status = self
            .stream(&args, streams)
            .await
            .map_err(|e| SandboxError::AttachFailed(e.to_string()))?;
        check_exit(status)
    }

    async fn kill(&self, id: &str) -> Result<(), SandboxError> {
        self.run(&["kill", id])
            .await
            .map_err(|e| SandboxError::KillFailed(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        self.run(&["rm", "--force", "--volumes", id])
            .await
            .map_err(|e| SandboxError::RemoveFailed(e.to_string()))?;
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: &str, streams: IoStreams<'_>) -> Result<(), SandboxError> {
        let mut args = vec!["exec"];
        if streams.stdin.is_some() {
            args.push("--interactive");
        }
        args.extend_from_slice(&[id, "/bin/sh", "-c", cmd]);

        let status = self.stream(&args, streams).await?;
        check_exit(status)
    }
}
