use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

/// Standard streams wired to a process inside the sandbox.
///
/// `stdin` is optional; when absent the process sees an empty input.
/// Passing the same [`crate::CaptureBuffer`] (cloned) as both `stdout` and
/// `stderr` yields combined output in arrival order.
pub struct IoStreams<'a> {
    pub stdin: Option<&'a mut (dyn AsyncRead + Send + Unpin)>,
    pub stdout: &'a mut (dyn AsyncWrite + Send + Unpin),
    pub stderr: &'a mut (dyn AsyncWrite + Send + Unpin),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Absent,
    Created,
    Running,
    Removed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Created => f.write_str("created"),
            Self::Running => f.write_str("running"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// The sandbox currently owned by a [`crate::SandboxManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub image: String,
}
