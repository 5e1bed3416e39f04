use buildstore::{BuildResult, LogRedactor};
use sandbox::{CaptureBuffer, IoStreams, SandboxManager};
use tracing::{debug, warn};

use crate::options::BuildOptions;

/// Appended after the error of a failed breakable command.
pub const TERMINAL_MARKER: &str = "Unexpected end of integration.";

/// One shell step of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub text: String,
    /// Failure stops the pipeline.
    pub breakable: bool,
}

impl Command {
    fn new(text: String, breakable: bool) -> Self {
        Self { text, breakable }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed,
    /// Not run because an earlier breakable step failed.
    Skipped,
}

/// What happened to each command of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub steps: Vec<StepOutcome>,
    /// Index of the breakable command that stopped the run.
    pub halted_at: Option<usize>,
}

impl PipelineReport {
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| **s == StepOutcome::Failed).count()
    }
}

/// The fixed build sequence: create the workspace, clone the submission and
/// the test repository, overlay the tests, install dependencies, run the
/// lab's tests. Only the final test run is non-breakable.
pub fn build_commands(opts: &BuildOptions, clone_host: &str) -> Vec<Command> {
    let base = &opts.base_folder;
    let dest = format!("{base}{}", opts.dest_folder);
    let tests = format!("{base}{}", opts.test_repo);
    let clone_url = |repo: &str| {
        format!(
            "https://{}:x-oauth-basic@{clone_host}/{}/{repo}.git",
            opts.admin_token, opts.org
        )
    };

    vec![
        Command::new(format!("mkdir -p {base}"), true),
        Command::new(
            format!("git clone {} {dest}/", clone_url(&opts.user_repo)),
            true,
        ),
        Command::new(
            format!("git clone {} {tests}/", clone_url(&opts.test_repo)),
            true,
        ),
        Command::new(format!("cp -rf {tests}/* {dest}/"), true),
        Command::new(
            format!("chmod 777 {dest}/dependencies.sh && cd {dest}/ && ./dependencies.sh"),
            true,
        ),
        Command::new(
            format!(
                "chmod 777 {dest}/{lab}/test.sh && cd {dest}/{lab}/ && ./test.sh",
                lab = opts.lab_folder
            ),
            false,
        ),
    ]
}

/// Run `commands` in order inside the managed sandbox, appending their
/// combined output to `result`.
///
/// A failed command's output is kept and followed by the error line. A
/// failed breakable command also appends [`TERMINAL_MARKER`] and skips the
/// rest.
pub async fn run_commands(
    manager: &mut SandboxManager,
    result: &mut BuildResult,
    redactor: &LogRedactor,
    commands: &[Command],
) -> PipelineReport {
    let mut steps = vec![StepOutcome::Skipped; commands.len()];
    let mut halted_at = None;

    for (index, (command, outcome)) in commands.iter().zip(steps.iter_mut()).enumerate() {
        debug!(build_id = result.id, step = index, command = %redactor.mask(&command.text), "exec");

        let capture = CaptureBuffer::new();
        let mut stdout = capture.clone();
        let mut stderr = capture.clone();
        let status = manager
            .exec(
                &command.text,
                IoStreams {
                    stdin: None,
                    stdout: &mut stdout,
                    stderr: &mut stderr,
                },
            )
            .await;
        result.add_output(&capture.take(), redactor);

        match status {
            Ok(()) => *outcome = StepOutcome::Succeeded,
            Err(e) => {
                *outcome = StepOutcome::Failed;
                let message = e.to_string();
                warn!(
                    build_id = result.id,
                    step = index,
                    breakable = command.breakable,
                    error = %redactor.mask(&message),
                    "command failed"
                );
                result.add(&message, redactor);
                if command.breakable {
                    result.add(TERMINAL_MARKER, redactor);
                    halted_at = Some(index);
                    break;
                }
            }
        }
    }

    PipelineReport { steps, halted_at }
}
