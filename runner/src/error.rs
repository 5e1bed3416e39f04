use std::fmt;

use buildstore::StoreError;
use sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid build options: {0}")]
    Options(String),

    #[error("no builds recorded for {0}")]
    NoBuilds(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Why a build did not reach [`BuildState::Linked`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("runtime unreachable: {0}")]
    Connection(#[source] SandboxError),

    #[error("sandbox creation failed: {0}")]
    Create(#[source] SandboxError),

    #[error("build id allocation failed: {0}")]
    Allocation(#[source] StoreError),

    #[error("saving build {build_id} failed: {source}")]
    Persistence { build_id: u64, source: StoreError },

    #[error("linking build {build_id} failed: {source}")]
    Linkage { build_id: u64, source: StoreError },

    #[error("build task fault: {0}")]
    Fault(String),
}

impl BuildError {
    /// Whether the attempt can be repeated. Only failures before any id was
    /// allocated or record written qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Create(_))
    }

    /// Terminal state of a build that failed this way.
    pub fn state(&self) -> BuildState {
        match self {
            Self::Linkage { .. } => BuildState::PersistedWithoutLink,
            _ => BuildState::Aborted,
        }
    }

    pub fn build_id(&self) -> Option<u64> {
        match self {
            Self::Persistence { build_id, .. } | Self::Linkage { build_id, .. } => Some(*build_id),
            _ => None,
        }
    }
}

/// Lifecycle of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Created,
    Running,
    Finalizing,
    Persisted,
    Linked,
    /// Record saved, history not updated.
    PersistedWithoutLink,
    /// Nothing persisted.
    Aborted,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Finalizing => "finalizing",
            Self::Persisted => "persisted",
            Self::Linked => "linked",
            Self::PersistedWithoutLink => "persisted_without_link",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pre_persistence_failures_retry() {
        assert!(BuildError::Connection(SandboxError::Connection("down".into())).is_retryable());
        assert!(BuildError::Create(SandboxError::CreationFailed("no image".into())).is_retryable());
        assert!(!BuildError::Fault("boom".into()).is_retryable());
        assert!(
            !BuildError::Persistence {
                build_id: 3,
                source: StoreError::Sequence("x".into()),
            }
            .is_retryable()
        );
    }

    #[test]
    fn linkage_failure_keeps_record() {
        let err = BuildError::Linkage {
            build_id: 7,
            source: StoreError::Sequence("x".into()),
        };
        assert_eq!(err.state(), BuildState::PersistedWithoutLink);
        assert_eq!(err.build_id(), Some(7));
        assert_eq!(BuildError::Fault("boom".into()).state(), BuildState::Aborted);
    }
}
