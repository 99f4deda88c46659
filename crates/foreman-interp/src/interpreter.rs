//! Ordered action execution.
//!
//! Contract: actions run strictly in parse order; one action's failure never
//! silently cancels the rest of the batch. A shell command that exits
//! nonzero *succeeds* as an action — downstream role logic reacts to its
//! output. Filesystem failures (`PathEscape`, `PayloadTooLarge`, IO) mark
//! that single action failed and execution continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use foreman_core::constants::{
    METRIC_ACTIONS_EXECUTED_TOTAL, METRIC_ACTION_DURATION_SECONDS, SENTINEL_SIGNED_OFF,
};
use foreman_core::settings::InterpSettings;
use foreman_workspace::search::search_text;
use foreman_workspace::{SignalStore, WorkspaceStore};

use crate::action::{Action, ActionKind, ActionOutcome};
use crate::process::{ProcessRunner, ShellOptions};

/// Executes parsed actions against the workspace store.
pub struct Interpreter {
    store: WorkspaceStore,
    signals: Arc<dyn SignalStore>,
    runner: Arc<dyn ProcessRunner>,
    settings: InterpSettings,
}

impl Interpreter {
    /// Create an interpreter bound to one workspace.
    pub fn new(
        store: WorkspaceStore,
        signals: Arc<dyn SignalStore>,
        runner: Arc<dyn ProcessRunner>,
        settings: InterpSettings,
    ) -> Self {
        Self {
            store,
            signals,
            runner,
            settings,
        }
    }

    /// Execute a batch of actions in order, returning one outcome each.
    ///
    /// If the project becomes signed off partway through the batch, the
    /// remaining actions are skipped — the sign-off sentinel outranks
    /// whatever else the response asked for. A sign-off that predates the
    /// batch does not suppress it; the cleaner role still needs to act.
    #[instrument(skip_all, fields(actions = actions.len()))]
    pub async fn execute(
        &self,
        actions: &[Action],
        cancel: &CancellationToken,
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());
        let signed_off_at_start = self.signals.is_set(SENTINEL_SIGNED_OFF);

        for action in actions {
            if !signed_off_at_start && self.signals.is_set(SENTINEL_SIGNED_OFF) {
                info!("project signed off mid-batch, skipping remaining actions");
                break;
            }
            let outcome = self.execute_one(action, cancel).await;
            counter!(
                METRIC_ACTIONS_EXECUTED_TOTAL,
                "kind" => outcome.kind.as_str(),
                "success" => if outcome.success { "true" } else { "false" },
            )
            .increment(1);
            histogram!(METRIC_ACTION_DURATION_SECONDS, "kind" => outcome.kind.as_str())
                .record(outcome.duration_ms as f64 / 1000.0);
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn execute_one(&self, action: &Action, cancel: &CancellationToken) -> ActionOutcome {
        let start = Instant::now();
        let description = action.describe();
        let kind = action.kind();

        let (success, output) = match action {
            Action::RunShell { command } => self.run_shell(command, cancel).await,
            Action::WriteFile { path, content } => match self.store.write_file(path, content).await
            {
                Ok(()) => (true, format!("Successfully wrote {path}")),
                Err(e) => {
                    warn!(path, error = %e, "write rejected");
                    (false, e.to_string())
                }
            },
            Action::ReadFile { path } => match self.store.read_numbered(path).await {
                Ok(rendered) => (true, rendered),
                Err(e) => (false, e.to_string()),
            },
            Action::SearchText { query } => {
                (true, search_text(self.store.root(), query))
            }
            Action::Unknown { tag } => {
                warn!(tag, "unrecognized block tag, skipped");
                (false, format!("Unrecognized block tag: {tag}"))
            }
        };

        ActionOutcome {
            kind,
            description,
            success,
            output,
            duration_ms: duration_ceil_ms(start),
        }
    }

    async fn run_shell(&self, command: &str, cancel: &CancellationToken) -> (bool, String) {
        let opts = ShellOptions {
            working_directory: self.store.root().to_path_buf(),
            timeout_ms: self.settings.shell_timeout_secs * 1000,
            cancellation: cancel.clone(),
            env: self.allowed_env(),
        };
        match self.runner.run(command, &opts).await {
            // Timeouts and nonzero exits stay "successful" actions: the
            // captured output is the signal the role logic reads.
            Ok(out) => (true, out.combined()),
            Err(e) => (false, e.to_string()),
        }
    }

    /// Environment visible to shell actions: the allow-list only, no
    /// ambient secrets.
    fn allowed_env(&self) -> HashMap<String, String> {
        self.settings
            .env_allow_list
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.clone(), v)))
            .collect()
    }
}

/// Milliseconds with a 1ms floor for any non-zero duration, so fast actions
/// do not report "0ms".
fn duration_ceil_ms(start: Instant) -> u64 {
    let micros = start.elapsed().as_micros();
    if micros == 0 {
        return 0;
    }
    ((micros + 999) / 1000) as u64
}
