//! Sprint worker sessions.
//!
//! A worker is a stripped-down session bound to exactly one task: no
//! lifecycle machine, no role selection, just a bounded turn loop that
//! keeps prompting until the model emits a completion marker or the turn
//! budget runs out. The final response text goes back to the scheduler,
//! which owns marker parsing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use foreman_core::constants::{FEATURE_LIST_FILE, SPRINT_TASK_COMPLETE, SPRINT_TASK_FAILED};
use foreman_core::settings::SprintSettings;
use foreman_interp::{parse_blocks, Action, Interpreter};
use foreman_server::client::HeartbeatClient;
use foreman_server::state::HeartbeatUpdate;
use foreman_sprint::{Task, TaskWorker, WorkerError};

use crate::client::AgentCli;
use crate::prompts;

const WORKER_HISTORY_LIMIT: usize = 10;

/// Runs one agent session per sprint task.
pub struct SprintTaskWorker {
    workspace: String,
    settings: SprintSettings,
    interpreter: Arc<Interpreter>,
    cli: Arc<dyn AgentCli>,
    channel_url: Option<String>,
    session_id: String,
}

impl SprintTaskWorker {
    /// Wire up a worker factory shared by the whole sprint.
    pub fn new(
        workspace: impl Into<String>,
        settings: SprintSettings,
        interpreter: Arc<Interpreter>,
        cli: Arc<dyn AgentCli>,
        channel_url: Option<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            settings,
            interpreter,
            cli,
            channel_url,
            session_id: session_id.into(),
        }
    }

    fn task_channel(&self, task: &Task) -> Option<HeartbeatClient> {
        let url = self.channel_url.as_deref()?;
        let id = format!("{}-{}", self.session_id, task.id);
        match HeartbeatClient::new(url, &id) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "worker heartbeat channel unavailable");
                None
            }
        }
    }

    /// Workers never touch the feature list; central aggregation happens
    /// after the wave. Offending writes are dropped with a warning.
    fn strip_forbidden_writes(actions: Vec<Action>) -> Vec<Action> {
        actions
            .into_iter()
            .filter(|action| match action {
                Action::WriteFile { path, .. } if targets_feature_list(path) => {
                    warn!(path, "worker attempted a feature list write, dropped");
                    false
                }
                _ => true,
            })
            .collect()
    }
}

/// Matches the final path component only, so files that merely share the
/// suffix (`my_feature_list.json`) stay writable.
fn targets_feature_list(path: &str) -> bool {
    std::path::Path::new(path)
        .file_name()
        .is_some_and(|name| name == FEATURE_LIST_FILE)
}

#[async_trait]
impl TaskWorker for SprintTaskWorker {
    #[instrument(skip(self, task, cancel), fields(task_id = %task.id))]
    async fn run_task(
        &self,
        task: &Task,
        cancel: CancellationToken,
    ) -> Result<String, WorkerError> {
        let channel = self.task_channel(task);
        if let Some(channel) = &channel {
            channel
                .report(&HeartbeatUpdate {
                    is_running: Some(true),
                    current_task: Some(format!("Starting: {}", task.title)),
                    ..HeartbeatUpdate::default()
                })
                .await;
        }

        let base_prompt = prompts::sprint_worker(&self.workspace, task);
        let mut history: Vec<String> = Vec::new();
        let mut last_response = String::new();

        for turn in 1..=self.settings.worker_turn_budget {
            if cancel.is_cancelled() {
                return Err(WorkerError::Session("cancelled".to_string()));
            }

            let prompt = if history.is_empty() {
                base_prompt.clone()
            } else {
                format!("{base_prompt}\n\nRecent actions:\n{}", history.join("\n"))
            };

            if let Some(channel) = &channel {
                channel
                    .report(&HeartbeatUpdate {
                        iteration: Some(turn),
                        current_task: Some(format!("Executing: {}", task.title)),
                        ..HeartbeatUpdate::default()
                    })
                    .await;
            }

            let response = self
                .cli
                .complete(&prompt, &cancel)
                .await
                .map_err(|e| WorkerError::Session(e.to_string()))?;

            let actions = Self::strip_forbidden_writes(parse_blocks(&response));
            let outcomes = self.interpreter.execute(&actions, &cancel).await;
            history.extend(outcomes.iter().map(|o| o.description.clone()));
            if history.len() > WORKER_HISTORY_LIMIT {
                let excess = history.len() - WORKER_HISTORY_LIMIT;
                let _ = history.drain(..excess);
            }
            if let Some(channel) = &channel {
                channel
                    .report(&HeartbeatUpdate {
                        last_log: Some(history.clone()),
                        ..HeartbeatUpdate::default()
                    })
                    .await;
            }

            let finished = response.contains(SPRINT_TASK_COMPLETE)
                || response.contains(SPRINT_TASK_FAILED);
            last_response = response;
            if finished {
                info!(task_id = %task.id, turn, "worker signaled completion");
                break;
            }
        }

        if let Some(channel) = &channel {
            channel
                .report(&HeartbeatUpdate {
                    is_running: Some(false),
                    current_task: Some("Finished".to_string()),
                    ..HeartbeatUpdate::default()
                })
                .await;
        }
        Ok(last_response)
    }
}
