//! Shell subprocess boundary.
//!
//! The interpreter never touches `tokio::process` directly; it goes through
//! [`ProcessRunner`] so tests can script command results. The real runner
//! executes `bash -c` with a scrubbed environment, the workspace as the
//! working directory, and a timeout/cancellation race.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Failure to even start a shell command (a timeout is not an error — it is
/// reported in [`ShellOutput`]).
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The subprocess could not be spawned.
    #[error("failed to spawn shell: {0}")]
    Spawn(String),
    /// The subprocess could not be awaited.
    #[error("failed waiting for shell: {0}")]
    Wait(String),
}

/// Options for one shell invocation.
#[derive(Clone, Debug)]
pub struct ShellOptions {
    /// Working directory (always the workspace root).
    pub working_directory: PathBuf,
    /// Timeout in milliseconds.
    pub timeout_ms: u64,
    /// Cooperative cancellation.
    pub cancellation: CancellationToken,
    /// The complete environment visible to the command. Everything not in
    /// this map is scrubbed.
    pub env: HashMap<String, String>,
}

/// Captured result of one shell invocation.
#[derive(Clone, Debug)]
pub struct ShellOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Exit code, -1 when unavailable.
    pub exit_code: i32,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// The command exceeded its timeout and was abandoned.
    pub timed_out: bool,
    /// The command was cancelled cooperatively.
    pub interrupted: bool,
}

impl ShellOutput {
    /// Combined output in the shape the agent reads back.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            out.push_str("\nSTDERR:\n");
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Subprocess execution boundary.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run one shell command to completion, timeout, or cancellation.
    async fn run(&self, command: &str, opts: &ShellOptions) -> Result<ShellOutput, ProcessError>;
}

/// Real subprocess execution backed by `tokio::process::Command`.
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &str, opts: &ShellOptions) -> Result<ShellOutput, ProcessError> {
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new("bash");
        let _ = cmd
            .arg("-c")
            .arg(command)
            .current_dir(&opts.working_directory)
            .env_clear()
            .envs(&opts.env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        debug!(command, working_dir = %opts.working_directory.display(), "spawning shell");

        let child = cmd
            .spawn()
            .map_err(|e| ProcessError::Spawn(e.to_string()))?;

        let timeout = std::time::Duration::from_millis(opts.timeout_ms);
        let cancel = opts.cancellation.clone();

        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| ProcessError::Wait(e.to_string()))?
            }
            () = tokio::time::sleep(timeout) => {
                warn!(command, timeout_ms = opts.timeout_ms, "shell command timed out");
                return Ok(ShellOutput {
                    stdout: String::new(),
                    stderr: format!(
                        "Command timed out after {} seconds. If you intended to run a \
                         background process, end the command with '&'.",
                        opts.timeout_ms / 1000
                    ),
                    exit_code: -1,
                    duration_ms: elapsed_ms(start),
                    timed_out: true,
                    interrupted: false,
                });
            }
            () = cancel.cancelled() => {
                debug!(command, "shell command cancelled");
                return Ok(ShellOutput {
                    stdout: String::new(),
                    stderr: "Command cancelled".into(),
                    exit_code: -1,
                    duration_ms: elapsed_ms(start),
                    timed_out: false,
                    interrupted: true,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let duration_ms = elapsed_ms(start);

        debug!(command, exit_code, duration_ms, "shell command completed");

        Ok(ShellOutput {
            stdout,
            stderr,
            exit_code,
            duration_ms,
            timed_out: false,
            interrupted: false,
        })
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Scripted runner for tests: returns canned outputs in order and records
/// every command it was asked to run.
#[derive(Default)]
pub struct MockProcessRunner {
    outputs: parking_lot::Mutex<Vec<ShellOutput>>,
    commands: parking_lot::Mutex<Vec<String>>,
}

impl MockProcessRunner {
    /// Create a runner that answers every command with exit code 0 and the
    /// given stdout values, in order; extra commands get empty output.
    pub fn with_stdout<I: IntoIterator<Item = String>>(outputs: I) -> Self {
        let scripted = outputs
            .into_iter()
            .map(|stdout| ShellOutput {
                stdout,
                stderr: String::new(),
                exit_code: 0,
                duration_ms: 1,
                timed_out: false,
                interrupted: false,
            })
            .collect();
        Self {
            outputs: parking_lot::Mutex::new(scripted),
            commands: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Commands seen so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: &str, _opts: &ShellOptions) -> Result<ShellOutput, ProcessError> {
        self.commands.lock().push(command.to_string());
        let mut outputs = self.outputs.lock();
        if outputs.is_empty() {
            Ok(ShellOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                duration_ms: 1,
                timed_out: false,
                interrupted: false,
            })
        } else {
            Ok(outputs.remove(0))
        }
    }
}
