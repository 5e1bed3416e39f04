mod capture;
mod error;
mod lock;
mod manager;
mod runtime;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capture::CaptureBuffer;
pub use error::{Result, SandboxError};
pub use lock::{ExecLock, ExecLocks, ExecScope};
pub use manager::{SandboxManager, TTY_COLS, TTY_ROWS};
pub use runtime::{Connector, Runtime};
pub use types::{IoStreams, SandboxHandle, SandboxState};
