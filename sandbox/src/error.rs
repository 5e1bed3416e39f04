use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("runtime not available: {0}")]
    Connection(String),

    #[error("sandbox creation failed: {0}")]
    CreationFailed(String),

    #[error("sandbox start failed: {0}")]
    StartFailed(String),

    #[error("attach failed: {0}")]
    AttachFailed(String),

    #[error("exit status {code}")]
    ExitStatus { code: i32 },

    #[error("execution failed: {0}")]
    ExecFailed(String),

    #[error("process killed on timeout after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("container is not running yet")]
    NoSandbox,

    #[error("sandbox kill failed: {0}")]
    KillFailed(String),

    #[error("sandbox removal failed: {0}")]
    RemoveFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
