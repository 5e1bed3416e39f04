mod attach;
mod build;
mod inspect;
mod serve;

use std::path::Path;
use std::sync::Arc;

use buildstore::{FileStore, LinkageKey, Submitter};
use clap::Args;
use runner::config::{self, RunnerConfig};
use runner::{Daemon, DaemonSettings, RunnerError, RunnerResult};
use sandbox_docker::DockerConnector;
use tracing::info;

pub use attach::{AttachArgs, run_attach};
pub use build::{BuildArgs, run_build};
pub use inspect::{HistoryArgs, ShowArgs, run_approve, run_history, run_show};
pub use serve::run_serve;

/// Identifies one submitter's history for a lab.
#[derive(Args)]
pub struct SubmitterArgs {
    /// Course (organization) name
    #[arg(long)]
    course: String,
    /// Individual submitter
    #[arg(long, conflicts_with = "group", required_unless_present = "group")]
    user: Option<String>,
    /// Group submitter
    #[arg(long)]
    group: Option<i64>,
    /// Lab number
    #[arg(long)]
    lab: u32,
}

impl SubmitterArgs {
    fn key(&self) -> RunnerResult<LinkageKey> {
        let submitter = match (&self.user, self.group) {
            (Some(user), None) => Submitter::User(user.clone()),
            (None, Some(group)) => Submitter::Group(group),
            _ => {
                return Err(RunnerError::Options(
                    "exactly one of --user or --group is required".into(),
                ));
            }
        };
        Ok(LinkageKey::new(self.course.clone(), submitter, self.lab))
    }
}

async fn open_store(config: &RunnerConfig) -> RunnerResult<Arc<FileStore>> {
    let store = FileStore::open(&config.store_dir).await?;
    Ok(Arc::new(store))
}

/// Load the config and wire a daemon to the docker endpoint and file store.
async fn open_daemon(config_path: &Path) -> RunnerResult<(RunnerConfig, Daemon)> {
    let config = config::load(config_path).await?;
    let store = open_store(&config).await?;
    info!(
        endpoint = %config.endpoint,
        image = %config.image,
        store = %config.store_dir.display(),
        exec_scope = ?config.exec_scope,
        "runner configured"
    );
    let daemon = Daemon::new(
        Arc::new(DockerConnector::new()),
        store,
        DaemonSettings::from(&config),
    );
    Ok((config, daemon))
}

fn print_json<T: serde::Serialize>(value: &T) -> RunnerResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| RunnerError::Internal(format!("serialize output: {e}")))?;
    println!("{json}");
    Ok(())
}
