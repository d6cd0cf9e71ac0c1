//! Subprocess supervision: spawn, stream, bound, time out, cancel.
//!
//! One [`ProcessRunner::run`] call owns one child process. Output is
//! captured line-wise per stream into bounded buffers; when a streaming
//! sink is subscribed for the execution id, lines are forwarded in order
//! through the [`StreamRegistry`].

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ProcessConfig;
use crate::{EngineError, Result};

/// Sentinel exit code recorded when the child exceeded its wall-time budget.
pub const EXIT_TIMEOUT: i32 = -1001;
/// Sentinel exit code recorded when the run was cancelled.
pub const EXIT_CANCELLED: i32 = -1002;
/// Sentinel exit code recorded when the child could not be spawned.
pub const EXIT_SPAWN_FAILED: i32 = -1003;

/// Marker appended to captured output when older lines were evicted.
pub const TRUNCATION_MARKER: &str = "[output truncated]";

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Sending half of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving half; cheap to clone and pass through every async call.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked cancellation pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

impl CancelHandle {
    /// Raise the cancellation signal. Level-triggered and idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Forward cancellation from an upstream token into this handle.
    pub fn link(&self, upstream: CancelToken) {
        let handle = self.clone();
        tokio::spawn(async move {
            upstream.cancelled().await;
            handle.cancel();
        });
    }
}

impl CancelToken {
    /// A token that can never be cancelled.
    pub fn never() -> Self {
        static NEVER: std::sync::OnceLock<watch::Sender<bool>> = std::sync::OnceLock::new();
        let tx = NEVER.get_or_init(|| watch::channel(false).0);
        CancelToken { rx: tx.subscribe() }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is raised; pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One line of live output, tagged with its stream.
#[derive(Debug, Clone)]
pub struct StreamLine {
    pub source: StreamSource,
    pub line: String,
}

/// Process-wide registry of live output subscriptions, keyed by execution id.
///
/// Broadcast channels give drop-oldest semantics: a lagging subscriber
/// observes `Lagged` instead of stalling the producer.
pub struct StreamRegistry {
    channels: DashMap<Uuid, broadcast::Sender<StreamLine>>,
    capacity: usize,
}

impl StreamRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to live output for an execution, creating the channel if
    /// this is the first subscriber.
    pub fn subscribe(&self, execution_id: Uuid) -> broadcast::Receiver<StreamLine> {
        self.channels
            .entry(execution_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    fn publish(&self, execution_id: Uuid, line: StreamLine) {
        if let Some(tx) = self.channels.get(&execution_id) {
            // No receivers is fine; the buffer just ages out.
            let _ = tx.send(line);
        }
    }

    pub fn remove(&self, execution_id: Uuid) {
        self.channels.remove(&execution_id);
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// A command ready to be supervised.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    /// Binds live output to a sink subscribed under this id.
    pub execution_id: Option<Uuid>,
}

/// Outcome of one supervised run.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
    pub error_output: String,
    pub duration: Duration,
}

/// Supervises child processes under the configured limits.
pub struct ProcessRunner {
    grace: Duration,
    max_output_bytes: usize,
    channel_capacity: usize,
    streams: Arc<StreamRegistry>,
}

/// Environment variables passed through so the child can exec at all.
const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR"];

impl ProcessRunner {
    pub fn new(config: &ProcessConfig, streams: Arc<StreamRegistry>) -> Self {
        Self {
            grace: config.termination_grace(),
            max_output_bytes: config.max_output_bytes,
            channel_capacity: config.stream_buffer_lines,
            streams,
        }
    }

    pub fn streams(&self) -> Arc<StreamRegistry> {
        Arc::clone(&self.streams)
    }

    /// Spawn the command and supervise it to a terminal state.
    pub async fn run(&self, spec: ProcessSpec, cancel: CancelToken) -> Result<ProcessResult> {
        let started = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        for key in PASSTHROUGH_ENV {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        command.envs(&spec.env);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(ProcessResult {
                    success: false,
                    exit_code: EXIT_SPAWN_FAILED,
                    output: String::new(),
                    error_output: format!("failed to spawn '{}': {e}", spec.program),
                    duration: started.elapsed(),
                });
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Process("child stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Process("child stderr not piped".into()))?;

        let (line_tx, mut line_rx) = mpsc::channel::<StreamLine>(self.channel_capacity);

        let stdout_tx = line_tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let item = StreamLine {
                    source: StreamSource::Stdout,
                    line,
                };
                if stdout_tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let stderr_tx = line_tx;
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let item = StreamLine {
                    source: StreamSource::Stderr,
                    line,
                };
                if stderr_tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let mut capture = OutputCapture::new(self.max_output_bytes);
        let deadline = tokio::time::Instant::now() + spec.timeout;
        let mut outcome: Option<(bool, i32, Option<&'static str>)> = None;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(program = %spec.program, "cancel signal received");
                    terminate_child(&mut child, self.grace).await;
                    outcome = Some((false, EXIT_CANCELLED, Some("process cancelled")));
                    break;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        program = %spec.program,
                        timeout_secs = spec.timeout.as_secs(),
                        "process timed out"
                    );
                    terminate_child(&mut child, self.grace).await;
                    outcome = Some((
                        false,
                        EXIT_TIMEOUT,
                        Some("process exceeded its timeout and was terminated"),
                    ));
                    break;
                }

                line = line_rx.recv() => {
                    match line {
                        Some(item) => {
                            if let Some(id) = spec.execution_id {
                                self.streams.publish(id, item.clone());
                            }
                            capture.push(item);
                        }
                        None => {
                            // Both streams closed; wait for exit.
                            let exit = child.wait().await.map_err(|e| {
                                EngineError::Process(format!("waiting on child failed: {e}"))
                            })?;
                            let code = exit.code().unwrap_or(-1);
                            debug!(program = %spec.program, code, "process exited");
                            outcome = Some((exit.success(), code, None));
                            break;
                        }
                    }
                }
            }
        }

        stdout_task.abort();
        stderr_task.abort();

        // Killed paths can leave buffered lines behind; drain what arrived.
        while let Ok(item) = line_rx.try_recv() {
            if let Some(id) = spec.execution_id {
                self.streams.publish(id, item.clone());
            }
            capture.push(item);
        }

        let (success, exit_code, note) =
            outcome.unwrap_or((false, -1, Some("supervision loop ended unexpectedly")));
        let (output, mut error_output) = capture.into_strings();
        if let Some(note) = note {
            if !error_output.is_empty() {
                error_output.push('\n');
            }
            error_output.push_str(note);
        }

        Ok(ProcessResult {
            success,
            exit_code,
            output,
            error_output,
            duration: started.elapsed(),
        })
    }
}

// ---------------------------------------------------------------------------
// Bounded capture
// ---------------------------------------------------------------------------

struct OutputCapture {
    stdout: VecDeque<String>,
    stderr: VecDeque<String>,
    total_bytes: usize,
    max_bytes: usize,
    truncated: bool,
}

impl OutputCapture {
    fn new(max_bytes: usize) -> Self {
        Self {
            stdout: VecDeque::new(),
            stderr: VecDeque::new(),
            total_bytes: 0,
            max_bytes,
            truncated: false,
        }
    }

    fn push(&mut self, item: StreamLine) {
        self.total_bytes += item.line.len();
        match item.source {
            StreamSource::Stdout => self.stdout.push_back(item.line),
            StreamSource::Stderr => self.stderr.push_back(item.line),
        }

        // Over budget: evict oldest lines, preferring the larger stream, so
        // the tail of both streams survives.
        while self.total_bytes > self.max_bytes {
            let evicted = if self.stdout.len() >= self.stderr.len() {
                self.stdout.pop_front()
            } else {
                self.stderr.pop_front()
            };
            match evicted {
                Some(line) => {
                    self.total_bytes -= line.len();
                    if !self.truncated {
                        warn!(max_bytes = self.max_bytes, "output over budget, evicting oldest lines");
                        self.truncated = true;
                    }
                }
                None => break,
            }
        }
    }

    fn into_strings(self) -> (String, String) {
        let mut out: Vec<String> = self.stdout.into();
        let err: Vec<String> = self.stderr.into();
        if self.truncated {
            out.push(TRUNCATION_MARKER.to_string());
        }
        (out.join("\n"), err.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Platform-specific termination
// ---------------------------------------------------------------------------

#[cfg(unix)]
async fn terminate_child(child: &mut tokio::process::Child, grace: Duration) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        let _ = signal::kill(pid, Signal::SIGTERM);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => (),
            Err(_) => {
                warn!(?pid, "process did not exit after SIGTERM; sending SIGKILL");
                let _ = signal::kill(pid, Signal::SIGKILL);
                let _ = child.wait().await;
            }
        }
    } else {
        let _ = child.wait().await;
    }
}

#[cfg(not(unix))]
async fn terminate_child(child: &mut tokio::process::Child, _grace: Duration) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
