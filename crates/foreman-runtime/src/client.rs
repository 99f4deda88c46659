//! External agent CLI boundary.
//!
//! One turn is one subprocess run: the prompt goes to stdin, the response
//! comes back on stdout. The trait keeps the turn loop testable without a
//! real model behind it.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use foreman_core::retry::RetryConfig;
use foreman_core::settings::AgentSettings;

use crate::errors::SessionError;

const STDERR_SNIPPET_BYTES: usize = 500;

/// One prompt in, one response out.
#[async_trait]
pub trait AgentCli: Send + Sync {
    /// Send `prompt` and wait for the complete response text.
    async fn complete(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SessionError>;
}

/// Runs the configured CLI binary as a subprocess per turn, with bounded
/// exponential-backoff retry on transient failures.
#[derive(Debug)]
pub struct CliAgentClient {
    command: String,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    retry: RetryConfig,
}

impl CliAgentClient {
    /// Build a client from the agent settings, rooted at the workspace.
    pub fn new(settings: &AgentSettings, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: settings.cli_command.clone(),
            args: settings.cli_args.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(settings.turn_timeout_secs),
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn run_once(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SessionError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            // Closing stdin signals end-of-prompt.
            drop(stdin);
        }

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output?;
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let snippet: String = stderr.chars().take(STDERR_SNIPPET_BYTES).collect();
                    Err(SessionError::CliExit {
                        code: output.status.code().unwrap_or(-1),
                        stderr: snippet,
                    })
                }
            }
            () = tokio::time::sleep(self.timeout) => {
                Err(SessionError::Timeout { secs: self.timeout.as_secs() })
            }
            () = cancel.cancelled() => Err(SessionError::Cancelled),
        }
    }
}

#[async_trait]
impl AgentCli for CliAgentClient {
    #[instrument(skip_all, fields(command = %self.command))]
    async fn complete(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SessionError> {
        let mut last: Option<SessionError> = None;
        for attempt in 1..=self.retry.max_attempts {
            match self.run_once(prompt, cancel).await {
                Ok(response) => {
                    debug!(attempt, bytes = response.len(), "agent CLI responded");
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(attempt, error = %err, delay_ms = delay, "agent CLI attempt failed, retrying");
                    let _ = last.replace(err);
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        () = cancel.cancelled() => return Err(SessionError::Cancelled),
                    }
                }
                Err(err @ SessionError::Cancelled) => return Err(err),
                Err(err) => {
                    let _ = last.replace(err);
                    break;
                }
            }
        }
        Err(SessionError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            last: last.map_or_else(|| "no attempts made".to_string(), |e| e.to_string()),
        })
    }
}

/// Test double: replays a scripted sequence of responses and records the
/// prompts it was given.
#[derive(Debug, Default)]
pub struct ScriptedAgentCli {
    responses: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgentCli {
    /// Empty script; every call fails until responses are pushed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().push_back(Ok(text.into()));
    }

    /// Queue a failed turn.
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.responses.lock().push_back(Err(reason.into()));
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl AgentCli for ScriptedAgentCli {
    async fn complete(
        &self,
        prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, SessionError> {
        self.prompts.lock().push(prompt.to_string());
        match self.responses.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(SessionError::RetriesExhausted {
                attempts: 1,
                last: reason,
            }),
            None => Err(SessionError::RetriesExhausted {
                attempts: 0,
                last: "script exhausted".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn settings(command: &str, args: &[&str], timeout_secs: u64) -> AgentSettings {
        AgentSettings {
            cli_command: command.to_string(),
            cli_args: args.iter().map(|a| (*a).to_string()).collect(),
            turn_timeout_secs: timeout_secs,
            ..AgentSettings::default()
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn echoes_stdin_through_a_real_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let client = CliAgentClient::new(&settings("cat", &[], 30), dir.path())
            .with_retry(fast_retry());

        let out = client
            .complete("hello turn", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "hello turn");
    }

    #[tokio::test]
    async fn missing_binary_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let client = CliAgentClient::new(
            &settings("definitely-not-a-real-binary-7f3a", &[], 5),
            dir.path(),
        )
        .with_retry(fast_retry());

        let err = client
            .complete("prompt", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, SessionError::RetriesExhausted { attempts: 2, .. });
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let client = CliAgentClient::new(
            &settings("bash", &["-c", "echo boom >&2; exit 3"], 30),
            dir.path(),
        )
        .with_retry(RetryConfig {
            max_attempts: 1,
            ..fast_retry()
        });

        let err = client
            .complete("prompt", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, SessionError::RetriesExhausted { attempts: 1, ref last }
            if last.contains("status 3") && last.contains("boom"));
    }

    #[tokio::test]
    async fn cancellation_wins_over_a_slow_process() {
        let dir = tempfile::tempdir().unwrap();
        let client = CliAgentClient::new(&settings("sleep", &["30"], 60), dir.path())
            .with_retry(fast_retry());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.complete("prompt", &cancel).await.unwrap_err();
        assert_matches!(err, SessionError::Cancelled);
    }

    #[tokio::test]
    async fn scripted_cli_replays_in_order() {
        let cli = ScriptedAgentCli::new();
        cli.push_response("first");
        cli.push_failure("model unavailable");

        let cancel = CancellationToken::new();
        assert_eq!(cli.complete("p1", &cancel).await.unwrap(), "first");
        assert_matches!(
            cli.complete("p2", &cancel).await.unwrap_err(),
            SessionError::RetriesExhausted { .. }
        );
        assert_eq!(cli.prompts(), vec!["p1".to_string(), "p2".to_string()]);
    }
}
