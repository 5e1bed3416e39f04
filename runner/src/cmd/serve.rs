use std::path::Path;
use std::sync::Arc;

use runner::{BuildOptions, Dispatcher, RunnerResult, StatusTracker};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{error, info, warn};

use super::open_daemon;

/// Dispatch one build per JSON line on stdin until EOF or a stop signal,
/// then drain the builds still running.
pub async fn run_serve(config_path: &Path) -> RunnerResult<()> {
    let (config, daemon) = open_daemon(config_path).await?;
    let status = Arc::new(StatusTracker::new(config.status_path()));
    status.write_initial().await;
    let mut dispatcher = Dispatcher::new(daemon, config.max_concurrent, status);

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!(max_concurrent = config.max_concurrent, "serving build requests from stdin");

    let mut line_number = 0u64;
    loop {
        let line = tokio::select! {
            _ = recv_signal(&mut sigterm) => {
                info!("received SIGTERM, draining");
                break;
            }
            _ = recv_signal(&mut sigint) => {
                info!("received SIGINT, draining");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("end of input, draining");
                break;
            }
            Err(e) => {
                error!(error = %e, "reading stdin failed, draining");
                break;
            }
        };
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let opts: BuildOptions = match serde_json::from_str(&line) {
            Ok(opts) => opts,
            Err(e) => {
                warn!(line = line_number, error = %e, "skipping malformed build request");
                continue;
            }
        };

        // Waiting for a free slot must not hold off a stop signal.
        let dispatched = tokio::select! {
            _ = recv_signal(&mut sigterm) => {
                info!("received SIGTERM, draining");
                break;
            }
            _ = recv_signal(&mut sigint) => {
                info!("received SIGINT, draining");
                break;
            }
            dispatched = dispatcher.dispatch(opts) => dispatched,
        };
        if let Err(e) = dispatched {
            warn!(line = line_number, error = %e, "build request rejected");
        }
    }

    dispatcher.drain().await;
    Ok(())
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
