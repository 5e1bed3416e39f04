use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Granularity of command serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecScope {
    /// One lock per sandbox: commands of different builds run in parallel.
    #[default]
    PerSandbox,
    /// One lock for the whole process: at most one command runs against the
    /// runtime at any instant, across all builds. Only needed for runtime
    /// clients that cannot take concurrent requests; a hung command stalls
    /// every build.
    Global,
}

/// Mutex guarding command execution inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct ExecLock {
    inner: Arc<Mutex<()>>,
}

impl ExecLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use. The lock is released when the guard drops.
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.inner).lock_owned().await
    }

    /// Whether both handles guard the same mutex.
    pub fn shares_with(&self, other: &ExecLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Hands out [`ExecLock`]s according to an [`ExecScope`].
#[derive(Debug, Clone)]
pub struct ExecLocks {
    scope: ExecScope,
    shared: ExecLock,
}

impl ExecLocks {
    pub fn new(scope: ExecScope) -> Self {
        Self {
            scope,
            shared: ExecLock::new(),
        }
    }

    pub fn scope(&self) -> ExecScope {
        self.scope
    }

    /// Lock for a new sandbox.
    pub fn next(&self) -> ExecLock {
        match self.scope {
            ExecScope::PerSandbox => ExecLock::new(),
            ExecScope::Global => self.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_sandbox_locks_are_independent() {
        let locks = ExecLocks::new(ExecScope::PerSandbox);
        assert!(!locks.next().shares_with(&locks.next()));
    }

    #[test]
    fn global_locks_are_shared() {
        let locks = ExecLocks::new(ExecScope::Global);
        assert!(locks.next().shares_with(&locks.next()));
    }

    #[tokio::test]
    async fn held_lock_blocks_second_acquire() {
        let lock = ExecLock::new();
        let _guard = lock.acquire().await;

        let second = tokio::time::timeout(std::time::Duration::from_millis(50), lock.acquire()).await;
        assert!(second.is_err(), "second acquire should wait");
    }

    #[test]
    fn scope_deserializes_from_snake_case() {
        let scope: ExecScope = serde_json::from_str("\"global\"").unwrap();
        assert_eq!(scope, ExecScope::Global);
        let scope: ExecScope = serde_json::from_str("\"per_sandbox\"").unwrap();
        assert_eq!(scope, ExecScope::PerSandbox);
    }
}
