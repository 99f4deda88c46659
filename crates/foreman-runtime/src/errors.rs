//! Session runner error types.

use foreman_workspace::WorkspaceError;
use thiserror::Error;

/// Failures raised while driving one session's turn loop.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The agent CLI binary could not be started.
    #[error("failed to spawn agent CLI '{command}': {source}")]
    Spawn {
        /// The command that was invoked.
        command: String,
        /// The underlying spawn error.
        source: std::io::Error,
    },

    /// I/O against the agent CLI's pipes failed.
    #[error("agent CLI I/O failed: {0}")]
    CliIo(#[from] std::io::Error),

    /// The agent CLI exited non-zero.
    #[error("agent CLI exited with status {code}: {stderr}")]
    CliExit {
        /// Process exit code (`-1` when killed by a signal).
        code: i32,
        /// Captured stderr, truncated.
        stderr: String,
    },

    /// The agent CLI produced no response within the turn timeout.
    #[error("agent CLI response timed out after {secs}s")]
    Timeout {
        /// The configured timeout.
        secs: u64,
    },

    /// The session was cancelled while waiting on the CLI.
    #[error("session cancelled")]
    Cancelled,

    /// Every retry attempt against the agent CLI failed.
    #[error("agent CLI failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last attempt's error.
        last: String,
    },

    /// Workspace storage failure.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl SessionError {
    /// Whether this error should be retried with backoff.
    ///
    /// Cancellation and workspace errors are not transient; spawn
    /// failures, timeouts, and CLI exits are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::CliIo(_) | Self::CliExit { .. } | Self::Timeout { .. }
        )
    }
}
