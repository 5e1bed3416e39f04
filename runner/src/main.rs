mod cmd;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "runner", version)]
struct Cli {
    /// Path to runner.yaml config file
    #[arg(long, short, global = true, env = "AUTOGRADER_CONFIG", default_value = "runner.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one supervised build and wait for it
    Build(Box<cmd::BuildArgs>),
    /// Dispatch newline-delimited JSON build requests read from stdin
    Serve,
    /// Print a build result as JSON
    Show(cmd::ShowArgs),
    /// Print the build history of a submitter's lab
    History(cmd::HistoryArgs),
    /// Approve the latest build of a submitter's lab
    Approve(cmd::HistoryArgs),
    /// Open an interactive shell in a fresh sandbox
    Attach(cmd::AttachArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Build(args) => cmd::run_build(&cli.config, *args).await,
        Command::Serve => cmd::run_serve(&cli.config).await,
        Command::Show(args) => cmd::run_show(&cli.config, args).await,
        Command::History(args) => cmd::run_history(&cli.config, args).await,
        Command::Approve(args) => cmd::run_approve(&cli.config, args).await,
        Command::Attach(args) => cmd::run_attach(&cli.config, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
