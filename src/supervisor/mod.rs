//! Workflow process supervision: launch, stream, retry.
//!
//! The supervisor runs the workflow command in `run` mode, then keeps
//! relaunching it in `resume` mode after retryable failures until it
//! finishes, asks to stop, or the attempt budget runs out. Output lines and
//! state changes are reported through an unbounded channel as they happen so
//! the caller can render progress during hours-long runs.
//!
//! ## Exit-code contract
//!
//! ```text
//! 0      → finished          (done)
//! 2      → cancelled         (user stop, no retry)
//! 3      → waiting-approval  (human gate, no retry)
//! other  → restart-pending   → resume after backoff
//! ```

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::events::clean_line;
use crate::json_scan::trailing_status;

/// Exit-code stand-in for attempts that never produced a real exit status.
pub const NO_EXIT_CODE: i32 = -1;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Only this much trailing stdout is kept for status decoding.
const CAPTURE_LIMIT_BYTES: usize = 256 * 1024;

/// Mode token passed to the workflow command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Run,
    Resume,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Run => "run",
            RunMode::Resume => "resume",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervisor state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowState {
    Run,
    Resume,
    Finished,
    Cancelled,
    WaitingApproval,
    RestartPending,
    Failed,
}

impl WorkflowState {
    pub fn label(self) -> &'static str {
        match self {
            WorkflowState::Run => "run",
            WorkflowState::Resume => "resume",
            WorkflowState::Finished => "finished",
            WorkflowState::Cancelled => "cancelled",
            WorkflowState::WaitingApproval => "waiting-approval",
            WorkflowState::RestartPending => "restart-pending",
            WorkflowState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Finished
                | WorkflowState::Cancelled
                | WorkflowState::WaitingApproval
                | WorkflowState::Failed
        )
    }

    /// Classify a child exit code.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => WorkflowState::Finished,
            2 => WorkflowState::Cancelled,
            3 => WorkflowState::WaitingApproval,
            _ => WorkflowState::RestartPending,
        }
    }

    fn for_mode(mode: RunMode) -> Self {
        match mode {
            RunMode::Run => WorkflowState::Run,
            RunMode::Resume => WorkflowState::Resume,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Events emitted during supervision, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// A cleaned, non-blank output line from the child.
    Line { stream: OutputStream, text: String },
    /// Supervisor bookkeeping message.
    Notice(String),
    AttemptStarted { attempt: u32, mode: RunMode },
    AttemptExited { attempt: u32, exit_code: i32 },
    StateChanged { state: WorkflowState },
}

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub exit_code: i32,
    /// Tail of the child's stdout, used to decode a trailing status object.
    pub stdout: String,
}

/// Final result of a supervised run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorResult {
    pub state: WorkflowState,
    pub attempts: u32,
    pub exit_code: i32,
    /// `status` field of the trailing JSON object on stdout, when present.
    pub status_label: Option<String>,
}

impl SupervisorResult {
    pub fn succeeded(&self) -> bool {
        self.state == WorkflowState::Finished
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("child {0} pipe was not captured")]
    MissingPipe(&'static str),
}

/// Runs one attempt of the workflow and streams its output.
#[async_trait::async_trait]
pub trait AttemptLauncher: Send + Sync {
    async fn run_attempt(
        &self,
        mode: RunMode,
        events: &UnboundedSender<SupervisorEvent>,
    ) -> Result<AttemptOutcome, LaunchError>;
}

/// How to invoke the workflow command.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    /// Arguments placed before the mode token.
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub run_id: String,
    pub max_concurrency: u32,
    pub env: Vec<(String, String)>,
    pub env_remove: Vec<String>,
}

impl LaunchSpec {
    /// Full argument list for one attempt.
    pub fn command_args(&self, mode: RunMode) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(mode.as_str().to_string());
        args.push("--root".to_string());
        args.push(self.work_dir.display().to_string());
        args.push("--run-id".to_string());
        args.push(self.run_id.clone());
        args.push("--max-concurrency".to_string());
        args.push(self.max_concurrency.to_string());
        args
    }
}

/// Launches the workflow as a real child process.
pub struct CommandLauncher {
    spec: LaunchSpec,
}

impl CommandLauncher {
    pub fn new(spec: LaunchSpec) -> Self {
        Self { spec }
    }
}

#[async_trait::async_trait]
impl AttemptLauncher for CommandLauncher {
    async fn run_attempt(
        &self,
        mode: RunMode,
        events: &UnboundedSender<SupervisorEvent>,
    ) -> Result<AttemptOutcome, LaunchError> {
        let spec = &self.spec;
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(spec.command_args(mode))
            .current_dir(&spec.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }
        for (key, val) in &spec.env {
            cmd.env(key, val);
        }

        info!(
            program = %spec.program,
            mode = %mode,
            work_dir = %spec.work_dir.display(),
            "spawning workflow"
        );

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(LaunchError::MissingPipe("stderr"))?;

        let (captured, _) = tokio::join!(
            pump_lines(stdout, OutputStream::Stdout, events, true),
            pump_lines(stderr, OutputStream::Stderr, events, false),
        );

        let status = child.wait().await.map_err(|source| LaunchError::Wait {
            program: spec.program.clone(),
            source,
        })?;
        // Signal termination has no code; it is retried like any failure.
        let exit_code = status.code().unwrap_or(NO_EXIT_CODE);
        info!(exit_code, "workflow exited");

        Ok(AttemptOutcome {
            exit_code,
            stdout: captured,
        })
    }
}

/// Read a pipe to EOF, forwarding each non-blank line. Invalid UTF-8 is
/// replaced rather than ending the read, so the pipe is always drained.
async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: OutputStream,
    events: &UnboundedSender<SupervisorEvent>,
    capture: bool,
) -> String {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut captured = TailCapture::new(CAPTURE_LIMIT_BYTES);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if capture {
                    captured.push(&line);
                }
                if let Some(text) = clean_line(&line) {
                    let _ = events.send(SupervisorEvent::Line { stream, text });
                }
            }
            Err(e) => {
                debug!(?stream, "pipe read error (process likely exited): {e}");
                break;
            }
        }
    }
    captured.into_string()
}

/// Keeps roughly the last `limit` bytes of a stream. The front is cut only
/// once the buffer holds twice the limit, so each byte moves at most once.
#[derive(Debug)]
struct TailCapture {
    text: String,
    limit: usize,
}

impl TailCapture {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.limit.saturating_mul(2) {
            trim_front(&mut self.text, self.limit);
        }
    }

    fn into_string(mut self) -> String {
        trim_front(&mut self.text, self.limit);
        self.text
    }
}

fn trim_front(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = text.len() - limit;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Owns the run/resume retry loop for one session.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    launcher: Arc<dyn AttemptLauncher>,
    events: UnboundedSender<SupervisorEvent>,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        launcher: Arc<dyn AttemptLauncher>,
        events: UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            config,
            launcher,
            events,
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }

    fn transition(&self, state: WorkflowState) {
        debug!(state = %state, "workflow state");
        self.emit(SupervisorEvent::StateChanged { state });
    }

    /// Run attempts sequentially until a terminal state is reached.
    pub async fn run(self) -> SupervisorResult {
        let max_attempts = self.config.max_attempts.max(1);
        let mut mode = RunMode::Run;
        let mut last = SupervisorResult {
            state: WorkflowState::Failed,
            attempts: 0,
            exit_code: NO_EXIT_CODE,
            status_label: None,
        };

        for attempt in 1..=max_attempts {
            self.transition(WorkflowState::for_mode(mode));
            self.emit(SupervisorEvent::AttemptStarted { attempt, mode });

            let launched = self.launcher.run_attempt(mode, &self.events).await;
            let (exit_code, status_label) = match launched {
                Ok(outcome) => (outcome.exit_code, trailing_status(&outcome.stdout)),
                Err(e) => {
                    warn!(attempt, "workflow attempt failed to run: {e}");
                    self.emit(SupervisorEvent::Notice(format!("launch failed: {e}")));
                    (NO_EXIT_CODE, None)
                }
            };
            self.emit(SupervisorEvent::AttemptExited { attempt, exit_code });

            let state = WorkflowState::from_exit_code(exit_code);
            last = SupervisorResult {
                state,
                attempts: attempt,
                exit_code,
                status_label,
            };
            if state.is_terminal() {
                self.transition(state);
                return last;
            }

            self.emit(SupervisorEvent::Notice(format!(
                "workflow exited with code {exit_code} (attempt {attempt}/{max_attempts})"
            )));
            if attempt == max_attempts {
                break;
            }

            self.transition(WorkflowState::RestartPending);
            mode = RunMode::Resume;
            tokio::time::sleep(self.config.backoff).await;
        }

        warn!(
            attempts = last.attempts,
            exit_code = last.exit_code,
            "workflow retry budget exhausted"
        );
        last.state = WorkflowState::Failed;
        self.transition(WorkflowState::Failed);
        last
    }
}
