//! Build orchestration for the autograder: runs a submission's test pipeline
//! in a throwaway sandbox, records the result, and links it into the
//! submitter's per-lab history.

pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod retry;
pub mod status;

pub use config::RunnerConfig;
pub use daemon::{BuildOutcome, Daemon, DaemonSettings, reconcile};
pub use dispatch::Dispatcher;
pub use error::{BuildError, BuildState, RunnerError, RunnerResult};
pub use options::BuildOptions;
pub use pipeline::{
    Command, PipelineReport, StepOutcome, TERMINAL_MARKER, build_commands, run_commands,
};
pub use retry::RetryConfig;
pub use status::{DispatchMode, StatusTracker};
