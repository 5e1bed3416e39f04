use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox::ExecScope;
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};
use crate::retry::RetryConfig;

pub const DEFAULT_ENDPOINT: &str = sandbox_docker::DEFAULT_ENDPOINT;
pub const DEFAULT_IMAGE: &str = "autograder";
pub const DEFAULT_CLONE_HOST: &str = "github.com";
pub(crate) const DEFAULT_MAX_CONCURRENT: usize = 4;

const STATUS_FILE: &str = "status.json";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Container runtime address.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Image every build sandbox is created from.
    #[serde(default = "default_image")]
    pub image: String,
    /// Root of the file-backed build store.
    pub store_dir: PathBuf,
    /// Host the submission and test repositories are cloned from.
    #[serde(default = "default_clone_host")]
    pub clone_host: String,
    #[serde(default)]
    pub exec_scope: ExecScope,
    /// Per-command limit; unset means commands may run forever.
    #[serde(default)]
    pub exec_timeout_secs: Option<u64>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_clone_host() -> String {
    DEFAULT_CLONE_HOST.to_string()
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

/// Load and validate a runner config from a YAML file.
///
/// A relative `store_dir` is resolved against the config file's parent directory.
pub async fn load(path: &Path) -> RunnerResult<RunnerConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RunnerError::Config(format!("read {}: {e}", path.display())))?;
    let mut config: RunnerConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| RunnerError::Config(format!("parse {}: {e}", path.display())))?;
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    config.validate()?;
    Ok(config)
}

impl RunnerConfig {
    /// Config with defaults for everything but the store location.
    pub fn new(store_dir: PathBuf) -> Self {
        Self {
            endpoint: default_endpoint(),
            image: default_image(),
            store_dir,
            clone_host: default_clone_host(),
            exec_scope: ExecScope::default(),
            exec_timeout_secs: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            retry: RetryConfig::default(),
        }
    }

    pub fn exec_timeout(&self) -> Option<Duration> {
        self.exec_timeout_secs.map(Duration::from_secs)
    }

    /// Where `serve` publishes its mode and active builds.
    pub fn status_path(&self) -> PathBuf {
        self.store_dir.join(STATUS_FILE)
    }

    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        if self.store_dir.is_relative() {
            self.store_dir = config_dir.join(&self.store_dir);
        }
    }

    fn validate(&self) -> RunnerResult<()> {
        sandbox_docker::validate_endpoint(&self.endpoint)
            .map_err(|e| RunnerError::Config(format!("endpoint: {e}")))?;
        if self.image.trim().is_empty() {
            return Err(RunnerError::Config("image must not be empty".into()));
        }
        if self.clone_host.trim().is_empty() || self.clone_host.contains('/') {
            return Err(RunnerError::Config(format!(
                "clone_host must be a bare host name, got '{}'",
                self.clone_host
            )));
        }
        if self.max_concurrent == 0 {
            return Err(RunnerError::Config("max_concurrent must be at least 1".into()));
        }
        if self.exec_timeout_secs == Some(0) {
            return Err(RunnerError::Config(
                "exec_timeout_secs must be positive; omit it to disable the timeout".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(RunnerError::Config("retry.max_attempts must be at least 1".into()));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(RunnerError::Config(
                "retry.backoff_multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn load_yaml(yaml: &str) -> (tempfile::TempDir, RunnerResult<RunnerConfig>) {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("runner.yaml");
        tokio::fs::write(&config_path, yaml).await.unwrap();
        let result = load(&config_path).await;
        (dir, result)
    }

    #[tokio::test]
    async fn load_full_config() {
        let (_dir, config) = load_yaml(
            r#"
endpoint: tcp://10.0.0.5:2375
image: autograder:2024
store_dir: /var/lib/autograder
clone_host: git.example.edu
exec_scope: global
exec_timeout_secs: 300
max_concurrent: 8
retry:
  max_attempts: 3
  initial_backoff_ms: 100
  max_backoff_ms: 2000
  backoff_multiplier: 3.0
"#,
        )
        .await;
        let config = config.unwrap();

        assert_eq!(config.endpoint, "tcp://10.0.0.5:2375");
        assert_eq!(config.image, "autograder:2024");
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/autograder"));
        assert_eq!(config.clone_host, "git.example.edu");
        assert_eq!(config.exec_scope, ExecScope::Global);
        assert_eq!(config.exec_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_multiplier, 3.0);
    }

    #[tokio::test]
    async fn load_applies_defaults() {
        let (_dir, config) = load_yaml("store_dir: /srv/builds\n").await;
        let config = config.unwrap();

        assert_eq!(config, RunnerConfig::new(PathBuf::from("/srv/builds")));
        assert_eq!(config.endpoint, "unix:///var/run/docker.sock");
        assert_eq!(config.image, "autograder");
        assert_eq!(config.clone_host, "github.com");
        assert_eq!(config.exec_scope, ExecScope::PerSandbox);
        assert_eq!(config.exec_timeout(), None);
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[tokio::test]
    async fn relative_store_dir_resolves_against_config_dir() {
        let (dir, config) = load_yaml("store_dir: data\n").await;
        let config = config.unwrap();
        assert_eq!(config.store_dir, dir.path().join("data"));
        assert_eq!(config.status_path(), dir.path().join("data/status.json"));
    }

    #[tokio::test]
    async fn load_fails_without_store_dir() {
        let (_dir, result) = load_yaml("image: autograder\n").await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("store_dir"), "got: {err}");
    }

    #[tokio::test]
    async fn load_rejects_invalid_values() {
        for (yaml, needle) in [
            ("store_dir: /x\nendpoint: http://host\n", "endpoint"),
            ("store_dir: /x\nmax_concurrent: 0\n", "max_concurrent"),
            ("store_dir: /x\nexec_timeout_secs: 0\n", "exec_timeout_secs"),
            ("store_dir: /x\nexec_scope: everywhere\n", "everywhere"),
            ("store_dir: /x\nretry:\n  max_attempts: 0\n", "max_attempts"),
            ("store_dir: /x\nclone_host: github.com/org\n", "clone_host"),
        ] {
            let (_dir, result) = load_yaml(yaml).await;
            let err = result.unwrap_err();
            assert!(err.to_string().contains(needle), "yaml {yaml:?} gave: {err}");
        }
    }

    #[tokio::test]
    async fn missing_file_is_config_error() {
        let err = load(Path::new("/nonexistent/runner.yaml")).await.unwrap_err();
        assert!(matches!(err, RunnerError::Config(_)));
    }

    #[test]
    fn serialized_config_loads_back() {
        let mut config = RunnerConfig::new(PathBuf::from("/srv/builds"));
        config.exec_scope = ExecScope::Global;
        config.exec_timeout_secs = Some(60);
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        let parsed: RunnerConfig = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
