use std::path::Path;

use clap::Args;
use runner::{BuildOptions, RunnerResult};
use serde_json::json;
use tracing::info;

use super::{open_daemon, print_json};

#[derive(Args)]
pub struct BuildArgs {
    /// Course organization that owns the repositories
    #[arg(long)]
    org: String,
    /// Individual submitter
    #[arg(long, conflicts_with = "group", required_unless_present = "group")]
    user: Option<String>,
    /// Group submitter
    #[arg(long)]
    group: Option<i64>,
    /// Submission repository name
    #[arg(long)]
    user_repo: String,
    /// Test repository name
    #[arg(long)]
    test_repo: String,
    /// Working directory prefix inside the sandbox (include the trailing slash)
    #[arg(long, default_value = "testground/")]
    base_folder: String,
    /// Lab folder inside the merged repository
    #[arg(long)]
    lab_folder: String,
    /// Lab number
    #[arg(long)]
    lab: u32,
    /// Folder the submission is cloned into
    #[arg(long, default_value = "labs")]
    dest_folder: String,
    /// Treat the build as triggered by a push
    #[arg(long)]
    push: bool,
    /// Token used to clone both repositories
    #[arg(long, env = "AUTOGRADER_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: String,
    /// Course secret that authenticates score lines
    #[arg(long, env = "AUTOGRADER_SECRET", hide_env_values = true, default_value = "")]
    secret: String,
    #[arg(long)]
    head_commit_id: Option<String>,
    #[arg(long)]
    head_commit_text: Option<String>,
}

impl From<BuildArgs> for BuildOptions {
    fn from(args: BuildArgs) -> Self {
        Self {
            org: args.org,
            user: args.user.unwrap_or_default(),
            group: args.group,
            user_repo: args.user_repo,
            test_repo: args.test_repo,
            base_folder: args.base_folder,
            lab_folder: args.lab_folder,
            lab_number: args.lab,
            dest_folder: args.dest_folder,
            is_push: args.push,
            admin_token: args.admin_token,
            secret: args.secret,
            head_commit_id: args.head_commit_id,
            head_commit_text: args.head_commit_text,
        }
    }
}

/// Run one supervised build. A failed build is reported in the log and the
/// exit status stays 0.
pub async fn run_build(config_path: &Path, args: BuildArgs) -> RunnerResult<()> {
    let opts = BuildOptions::from(args);
    opts.validate()?;
    let (_, daemon) = open_daemon(config_path).await?;

    match daemon.supervise(opts).await {
        Ok(outcome) => print_json(&json!({
            "build_id": outcome.build_id,
            "state": outcome.state.to_string(),
            "total_score": outcome.total_score,
        })),
        Err(e) => {
            info!(state = %e.state(), "build did not complete");
            print_json(&json!({
                "build_id": e.build_id(),
                "state": e.state().to_string(),
                "error": e.to_string(),
            }))
        }
    }
}
