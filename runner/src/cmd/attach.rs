use std::path::Path;

use clap::Args;
use runner::{RunnerResult, config};
use sandbox::{Connector, ExecLock, IoStreams, SandboxManager};
use sandbox_docker::DockerConnector;
use tracing::{info, warn};

#[derive(Args)]
pub struct AttachArgs {
    /// Image to start instead of the configured one
    #[arg(long)]
    image: Option<String>,
}

/// Create a sandbox, hand it the terminal, and remove it when the session ends.
pub async fn run_attach(config_path: &Path, args: AttachArgs) -> RunnerResult<()> {
    let config = config::load(config_path).await?;
    let image = args.image.unwrap_or(config.image);
    let runtime = DockerConnector::new().connect(&config.endpoint).await?;

    let mut manager = SandboxManager::new(runtime, ExecLock::new());
    let id = manager.create(&image).await?.id.clone();
    info!(sandbox = %id, image = %image, "attaching, exit the shell to end the session");

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let session = manager
        .attach(IoStreams {
            stdin: Some(&mut stdin),
            stdout: &mut stdout,
            stderr: &mut stderr,
        })
        .await;

    if let Err(e) = manager.remove().await {
        warn!(sandbox = %id, error = %e, "sandbox removal failed");
    }
    session?;
    info!(sandbox = %id, "session ended");
    Ok(())
}
