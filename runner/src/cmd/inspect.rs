use std::path::Path;

use buildstore::{BuildStore, LinkageStore};
use clap::Args;
use runner::config;
use runner::daemon::describe;
use runner::{RunnerError, RunnerResult};
use serde_json::json;

use super::{SubmitterArgs, open_daemon, open_store, print_json};

#[derive(Args)]
pub struct ShowArgs {
    /// Build id
    id: u64,
}

#[derive(Args)]
pub struct HistoryArgs {
    #[command(flatten)]
    submitter: SubmitterArgs,
}

pub async fn run_show(config_path: &Path, args: ShowArgs) -> RunnerResult<()> {
    let config = config::load(config_path).await?;
    let builds = BuildStore::new(open_store(&config).await?);
    let result = builds.get_build_result(args.id).await?;
    print_json(&result)
}

/// Print the history's head, every linked build id, and the latest build.
pub async fn run_history(config_path: &Path, args: HistoryArgs) -> RunnerResult<()> {
    let key = args.submitter.key()?;
    let config = config::load(config_path).await?;
    let store = open_store(&config).await?;
    let builds = BuildStore::new(store.clone());
    let linkage = LinkageStore::new(store);

    let head = linkage.head(&key).await?;
    let Some(latest_id) = head.latest else {
        return Err(RunnerError::NoBuilds(describe(&key)));
    };
    let history = linkage.history(&key).await?;
    let latest = builds.get_build_result(latest_id).await?;

    print_json(&json!({
        "head": head,
        "builds": history,
        "latest": latest,
    }))
}

pub async fn run_approve(config_path: &Path, args: HistoryArgs) -> RunnerResult<()> {
    let key = args.submitter.key()?;
    let (_, daemon) = open_daemon(config_path).await?;
    let approved = daemon.approve_latest(&key).await?;
    print_json(&approved)
}
