use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sandbox::{Connector, Runtime, SandboxError};
use tracing::info;

use crate::command;
use crate::prerequisites::check_prerequisites;
use crate::runtime::DockerRuntime;

/// Connects to a docker daemon through the `docker` client binary.
#[derive(Debug, Clone, Default)]
pub struct DockerConnector {
    binary: Option<PathBuf>,
}

impl DockerConnector {
    /// Look the client up on `PATH` at connect time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific client binary.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary: Some(binary),
        }
    }
}

#[async_trait]
impl Connector for DockerConnector {
    fn name(&self) -> &str {
        "docker"
    }

    /// Resolve the client, then ask the daemon for its version to prove it
    /// is reachable.
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Runtime>, SandboxError> {
        let binary = check_prerequisites(self.binary.as_deref(), endpoint)?;

        let version = command::run(
            &binary,
            endpoint,
            &["version", "--format", "{{.Server.Version}}"],
        )
        .await
        .map_err(|e| SandboxError::Connection(format!("{endpoint}: {}", e.detail)))?;
        info!(endpoint, server_version = %version, "connected to docker");

        Ok(Arc::new(DockerRuntime::new(binary, endpoint.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_endpoint_before_probing() {
        let connector = DockerConnector::with_binary(PathBuf::from("/nonexistent/docker"));
        let err = connector.connect("ftp://host").await.err().unwrap();
        assert!(err.to_string().contains("unsupported endpoint"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_binary_is_connection_error() {
        let connector = DockerConnector::with_binary(PathBuf::from("/nonexistent/docker"));
        let err = connector
            .connect("unix:///var/run/docker.sock")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::Connection(_)));
    }

    #[tokio::test]
    async fn failed_probe_is_connection_error() {
        // `false` exits non-zero like a client that cannot reach its daemon.
        let Ok(false_bin) = which::which("false") else {
            return;
        };
        let connector = DockerConnector::with_binary(false_bin);
        let err = connector.connect("tcp://127.0.0.1:1").await.err().unwrap();
        assert!(matches!(err, SandboxError::Connection(_)));
    }
}
