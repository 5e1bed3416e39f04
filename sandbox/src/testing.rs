//! In-memory runtime that replays scripted command results.

#![allow(clippy::panic)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, SandboxError};
use crate::runtime::{Connector, Runtime};
use crate::types::IoStreams;

/// A runtime operation as observed by [`ScriptedRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Start(String),
    Resize(String),
    Attach(String),
    Exec { id: String, cmd: String },
    Kill(String),
    Remove(String),
}

/// Outcome of a command whose text contains a registered pattern.
#[derive(Debug, Clone, Default)]
pub struct ExecScript {
    output: Vec<u8>,
    exit_code: i32,
    delay: Option<Duration>,
    panics: bool,
}

impl ExecScript {
    /// Write `text` to stdout and exit 0.
    pub fn output(text: &str) -> Self {
        Self {
            output: text.as_bytes().to_vec(),
            ..Self::default()
        }
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Sleep before writing output.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic inside the runtime instead of returning.
    pub fn panic(mut self) -> Self {
        self.panics = true;
        self
    }
}

#[derive(Default)]
struct State {
    next_id: usize,
    calls: Vec<Call>,
    live: HashSet<String>,
    scripts: Vec<(String, ExecScript)>,
}

/// [`Runtime`] whose sandboxes exist only as ids and whose commands return
/// whatever was scripted for them. Unscripted commands succeed silently.
#[derive(Default)]
pub struct ScriptedRuntime {
    state: Mutex<State>,
    create_failures: AtomicUsize,
    fail_remove: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` fails.
    pub fn fail_create(self) -> Self {
        self.fail_create_times(usize::MAX)
    }

    /// The next `times` calls to `create` fail.
    pub fn fail_create_times(self, times: usize) -> Self {
        self.create_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    /// Register the outcome for commands containing `pattern`.
    /// Earlier registrations win.
    pub fn script(&self, pattern: &str, script: ExecScript) {
        self.state().scripts.push((pattern.to_string(), script));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Commands passed to `exec`, in order.
    pub fn exec_commands(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Exec { cmd, .. } => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ids passed to `remove`, in order.
    pub fn removed(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Remove(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Sandboxes created and not yet removed.
    pub fn live_sandboxes(&self) -> usize {
        self.state().live.len()
    }

    /// Highest number of `exec` calls observed running at the same time.
    pub fn max_concurrent_execs(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    fn take_create_failure(&self) -> bool {
        self.create_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create(&self, _image: &str) -> Result<String> {
        if self.take_create_failure() {
            return Err(SandboxError::CreationFailed("scripted failure".into()));
        }
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("sandbox-{}", state.next_id);
        state.live.insert(id.clone());
        state.calls.push(Call::Create(id.clone()));
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record(Call::Start(id.to_string()));
        Ok(())
    }

    async fn attach(&self, id: &str, _streams: IoStreams<'_>) -> Result<()> {
        self.record(Call::Attach(id.to_string()));
        Ok(())
    }

    async fn resize_tty(&self, id: &str, _rows: u16, _cols: u16) -> Result<bool> {
        self.record(Call::Resize(id.to_string()));
        Ok(true)
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.record(Call::Kill(id.to_string()));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        if self.fail_remove {
            return Err(SandboxError::RemoveFailed("scripted failure".into()));
        }
        let mut state = self.state();
        state.live.remove(id);
        state.calls.push(Call::Remove(id.to_string()));
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: &str, streams: IoStreams<'_>) -> Result<()> {
        let script = {
            let mut state = self.state();
            state.calls.push(Call::Exec {
                id: id.to_string(),
                cmd: cmd.to_string(),
            });
            state
                .scripts
                .iter()
                .find(|(pattern, _)| cmd.contains(pattern.as_str()))
                .map(|(_, script)| script.clone())
                .unwrap_or_default()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if script.panics {
            panic!("scripted panic while running: {cmd}");
        }
        streams.stdout.write_all(&script.output).await?;
        streams.stdout.flush().await?;

        match script.exit_code {
            0 => Ok(()),
            code => Err(SandboxError::ExitStatus { code }),
        }
    }
}

/// [`Connector`] handing out one shared [`ScriptedRuntime`].
pub struct ScriptedConnector {
    runtime: Arc<ScriptedRuntime>,
    failures: AtomicUsize,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(runtime: Arc<ScriptedRuntime>) -> Self {
        Self {
            runtime,
            failures: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        }
    }

    /// The next `times` connection attempts fail.
    pub fn fail_times(self, times: usize) -> Self {
        self.failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn runtime(&self) -> &Arc<ScriptedRuntime> {
        &self.runtime
    }

    /// Connection attempts so far, failed ones included.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Runtime>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SandboxError::Connection(format!("{endpoint}: unreachable")));
        }
        Ok(self.runtime.clone())
    }
}
