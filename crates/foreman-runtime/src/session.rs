//! The per-session turn loop.
//!
//! One turn: drain control commands, ask the lifecycle machine for a role,
//! build the prompt, call the agent CLI, execute the parsed actions, report
//! a heartbeat, persist loop state. The loop is single-threaded and
//! cooperative: a turn runs to completion before the next is evaluated, and
//! stop/pause are observed only at turn boundaries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use foreman_core::constants::{
    CLEANUP_REPORT_FILE, FEATURE_LIST_FILE, HUMAN_IN_LOOP_FILE, MANAGER_DIRECTIVES_FILE,
    METRIC_SESSION_TURNS_TOTAL, METRIC_TURN_DURATION_SECONDS, SENTINEL_COMPLETED,
    SENTINEL_QA_PASSED, SENTINEL_SIGNED_OFF,
};
use foreman_core::features::FeatureList;
use foreman_core::roles::Role;
use foreman_core::settings::AgentSettings;
use foreman_interp::{parse_blocks, ActionOutcome, Interpreter};
use foreman_server::client::HeartbeatClient;
use foreman_server::state::HeartbeatUpdate;
use foreman_workspace::{SignalStore, WorkspaceStore};

use crate::client::AgentCli;
use crate::control::ControlState;
use crate::lifecycle::{Decision, LifecycleMachine, Observations, TerminationReason};
use crate::prompts::{self, PromptContext};
use crate::state::LoopState;

const PROGRESS_TAIL_LINES: usize = 10;
const PAUSE_POLL: Duration = Duration::from_secs(1);

/// How one session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    /// Why the loop halted.
    pub reason: TerminationReason,
    /// Turns completed over the session's lifetime.
    pub iterations: u32,
}

/// Drives the role loop for one workspace.
pub struct SessionRunner {
    session_id: String,
    settings: AgentSettings,
    store: WorkspaceStore,
    signals: Arc<dyn SignalStore>,
    interpreter: Interpreter,
    cli: Arc<dyn AgentCli>,
    control: Arc<ControlState>,
    channel: Option<HeartbeatClient>,
    cancel: CancellationToken,
}

impl SessionRunner {
    /// Wire up a runner. `channel` may be `None` for headless runs.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        settings: AgentSettings,
        store: WorkspaceStore,
        signals: Arc<dyn SignalStore>,
        interpreter: Interpreter,
        cli: Arc<dyn AgentCli>,
        control: Arc<ControlState>,
        channel: Option<HeartbeatClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            settings,
            store,
            signals,
            interpreter,
            cli,
            control,
            channel,
            cancel,
        }
    }

    /// Run the loop until a terminal state. Never panics and never returns
    /// early on per-turn failures; everything fatal is folded into the
    /// report's [`TerminationReason`].
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn run(&mut self) -> SessionReport {
        let root = self.store.root().to_path_buf();
        let mut state = LoopState::load(&root);
        // Scaffolding presence is re-derived from the filesystem; the
        // persisted flag alone is not trusted.
        state.first_run = !self.store.exists(FEATURE_LIST_FILE).await;

        let mut machine = LifecycleMachine::new(&self.settings, state.manager_ran_first);

        if state.first_run {
            info!("fresh start, clearing stale sentinels");
            for sentinel in [SENTINEL_COMPLETED, SENTINEL_QA_PASSED, SENTINEL_SIGNED_OFF] {
                if let Err(err) = self.signals.clear(sentinel) {
                    warn!(sentinel, error = %err, "failed to clear stale sentinel");
                }
            }
        }

        self.report(HeartbeatUpdate {
            is_running: Some(true),
            iteration: Some(state.iteration),
            current_task: Some("Initializing".to_string()),
            ..HeartbeatUpdate::default()
        })
        .await;

        let reason = self.turn_loop(&mut state, &mut machine).await;

        if !machine.is_terminal() {
            machine.terminate(&reason);
        }
        state.manager_ran_first = machine.manager_ran_first();
        state.save(&root);

        self.report(HeartbeatUpdate {
            is_running: Some(false),
            current_task: Some(format!("Stopped: {reason:?}")),
            ..HeartbeatUpdate::default()
        })
        .await;

        SessionReport {
            reason,
            iterations: state.iteration,
        }
    }

    async fn turn_loop(
        &mut self,
        state: &mut LoopState,
        machine: &mut LifecycleMachine,
    ) -> TerminationReason {
        let root = self.store.root().to_path_buf();

        'session: loop {
            // Iteration budget, with a small grace window when sign-off
            // happened but cleanup has not run yet.
            if let Some(max) = self.settings.max_iterations {
                if state.iteration >= max {
                    let signed_off = self.signals.is_set(SENTINEL_SIGNED_OFF);
                    let cleanup_done = self.store.exists(CLEANUP_REPORT_FILE).await;
                    let within_grace =
                        state.iteration < max.saturating_add(self.settings.cleanup_grace_turns);
                    if signed_off && !cleanup_done && within_grace {
                        info!(iteration = state.iteration, "budget reached, extra turn for cleanup");
                    } else {
                        break 'session TerminationReason::BudgetExhausted;
                    }
                }
            }

            self.drain_commands().await;

            if self.cancel.is_cancelled() || self.control.stop_requested() {
                break 'session TerminationReason::StopRequested;
            }

            if self.control.pause_requested() {
                info!("paused");
                self.report(HeartbeatUpdate {
                    is_paused: Some(true),
                    current_task: Some("Paused".to_string()),
                    ..HeartbeatUpdate::default()
                })
                .await;
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(PAUSE_POLL) => {}
                        () = self.cancel.cancelled() => {
                            break 'session TerminationReason::StopRequested;
                        }
                    }
                    self.drain_commands().await;
                    if self.control.stop_requested() {
                        break 'session TerminationReason::StopRequested;
                    }
                    if !self.control.pause_requested() {
                        break;
                    }
                }
                info!("resumed");
                self.report(HeartbeatUpdate {
                    is_paused: Some(false),
                    current_task: Some("Resuming".to_string()),
                    ..HeartbeatUpdate::default()
                })
                .await;
            }

            if self.control.take_skip() {
                info!("skipping one turn as requested");
                continue;
            }

            if self.store.exists(HUMAN_IN_LOOP_FILE).await {
                let why = self
                    .store
                    .read_file(HUMAN_IN_LOOP_FILE)
                    .await
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                break 'session TerminationReason::HumanInLoop(why);
            }

            let features = self.load_features_lenient().await;
            let cleanup_done = self.store.exists(CLEANUP_REPORT_FILE).await;
            let decision = {
                let obs = Observations {
                    iteration: state.iteration,
                    first_run: state.first_run,
                    features: &features,
                    signals: self.signals.as_ref(),
                    cleanup_done,
                };
                machine.decide(&obs)
            };
            let role = match decision {
                Ok(Decision::Run(role)) => role,
                Ok(Decision::Halt(reason)) => break 'session reason,
                Err(err) => break 'session TerminationReason::Fatal(err.to_string()),
            };

            state.iteration += 1;
            info!(iteration = state.iteration, %role, "turn start");
            counter!(METRIC_SESSION_TURNS_TOTAL, "role" => role.as_str()).increment(1);
            self.report(HeartbeatUpdate {
                iteration: Some(state.iteration),
                role: Some(role.as_str().to_string()),
                current_task: Some(format!("Running {role}")),
                ..HeartbeatUpdate::default()
            })
            .await;

            if let Some(progress) = self.store.progress_tail(PROGRESS_TAIL_LINES).await {
                info!(progress = %progress, "recent progress");
            }

            let prompt = self.build_prompt(role, &features).await;
            let turn_started = Instant::now();

            match self.cli.complete(&prompt, &self.cancel).await {
                Ok(response) => {
                    state.consecutive_errors = 0;
                    let outcomes = self.apply_response(&response).await;
                    state.push_history(outcomes.iter().map(|o| o.description.clone()));
                    state.first_run = !self.store.exists(FEATURE_LIST_FILE).await;

                    let features = self.load_features_lenient().await;
                    let obs = Observations {
                        iteration: state.iteration,
                        first_run: state.first_run,
                        features: &features,
                        signals: self.signals.as_ref(),
                        cleanup_done: self.store.exists(CLEANUP_REPORT_FILE).await,
                    };
                    machine.observe_turn(&obs);

                    self.report(HeartbeatUpdate {
                        last_log: Some(state.recent_history.clone()),
                        tool_usage: Some(tool_usage(&outcomes)),
                        current_task: Some("Waiting (auto-continue)".to_string()),
                        ..HeartbeatUpdate::default()
                    })
                    .await;
                }
                Err(crate::errors::SessionError::Cancelled) => {
                    break 'session TerminationReason::StopRequested;
                }
                Err(err) => {
                    state.consecutive_errors += 1;
                    warn!(
                        error = %err,
                        streak = state.consecutive_errors,
                        limit = self.settings.max_consecutive_errors,
                        "turn failed"
                    );
                    if state.consecutive_errors >= self.settings.max_consecutive_errors {
                        break 'session TerminationReason::ConsecutiveErrors(
                            state.consecutive_errors,
                        );
                    }
                }
            }

            histogram!(METRIC_TURN_DURATION_SECONDS).record(turn_started.elapsed().as_secs_f64());
            state.manager_ran_first = machine.manager_ran_first();
            state.save(&root);

            let delay = Duration::from_secs(self.settings.auto_continue_delay_secs);
            if !delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = self.cancel.cancelled() => {}
                }
            }
        }
    }

    /// Parse and execute a response's action blocks. A response with no
    /// parsable blocks is a logged no-op turn.
    async fn apply_response(&self, response: &str) -> Vec<ActionOutcome> {
        let actions = parse_blocks(response);
        if actions.is_empty() {
            info!("no actionable blocks in response, no-op turn");
            return Vec::new();
        }
        self.interpreter.execute(&actions, &self.cancel).await
    }

    async fn build_prompt(&self, role: Role, features: &FeatureList) -> String {
        let directives = self.store.read_file(MANAGER_DIRECTIVES_FILE).await.ok();
        let progress = self.store.progress_tail(PROGRESS_TAIL_LINES).await;
        let ctx = PromptContext {
            workspace: self.store.root().display().to_string(),
            directives,
            progress,
            feature_summary: format!("{}/{} passing", features.passing_count(), features.len()),
        };
        prompts::for_role(role, &ctx)
    }

    /// A malformed feature list is reported but never crashes the loop.
    async fn load_features_lenient(&self) -> FeatureList {
        match self.store.load_features().await {
            Ok(features) => features,
            Err(err) => {
                warn!(error = %err, "feature list unreadable, treating as empty");
                FeatureList::default()
            }
        }
    }

    async fn drain_commands(&self) {
        if let Some(channel) = &self.channel {
            for command in channel.drain_commands().await {
                self.control.apply(command);
            }
        }
    }

    async fn report(&self, update: HeartbeatUpdate) {
        if let Some(channel) = &self.channel {
            channel.report(&update).await;
        }
    }
}

fn tool_usage(outcomes: &[ActionOutcome]) -> BTreeMap<String, u64> {
    let mut usage = BTreeMap::new();
    for outcome in outcomes {
        *usage.entry(outcome.kind.as_str().to_string()).or_insert(0) += 1;
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::settings::InterpSettings;
    use foreman_interp::TokioProcessRunner;
    use foreman_server::ControlCommand;
    use foreman_workspace::FsSignalStore;

    use crate::client::ScriptedAgentCli;

    struct Harness {
        _dir: tempfile::TempDir,
        runner: SessionRunner,
        cli: Arc<ScriptedAgentCli>,
        control: Arc<ControlState>,
        root: std::path::PathBuf,
    }

    fn harness(settings: AgentSettings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let store = WorkspaceStore::new(&root, 2 * 1024 * 1024);
        let signals: Arc<dyn SignalStore> = Arc::new(FsSignalStore::new(&root));
        let interpreter = Interpreter::new(
            store.clone(),
            Arc::clone(&signals),
            Arc::new(TokioProcessRunner),
            InterpSettings::default(),
        );
        let cli = Arc::new(ScriptedAgentCli::new());
        let control = Arc::new(ControlState::new());
        let runner = SessionRunner::new(
            "test-session",
            settings,
            store,
            signals,
            interpreter,
            cli.clone(),
            Arc::clone(&control),
            None,
            CancellationToken::new(),
        );
        Harness {
            _dir: dir,
            runner,
            cli,
            control,
            root,
        }
    }

    fn fast_settings(max_iterations: Option<u32>) -> AgentSettings {
        AgentSettings {
            max_iterations,
            auto_continue_delay_secs: 0,
            manager_frequency: 100,
            ..AgentSettings::default()
        }
    }

    fn write_features(root: &std::path::Path, passes: &[bool]) {
        let records: Vec<serde_json::Value> = passes
            .iter()
            .map(|p| {
                serde_json::json!({
                    "description": "a feature",
                    "steps": ["do it"],
                    "passes": p
                })
            })
            .collect();
        std::fs::write(
            root.join(FEATURE_LIST_FILE),
            serde_json::to_string(&records).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn initializer_runs_first_and_scaffolds_the_workspace() {
        let mut h = harness(fast_settings(Some(2)));
        h.cli.push_response(
            "```write:feature_list.json\n[{\"description\": \"boot\", \"steps\": [], \"passes\": false}]\n```",
        );
        h.cli.push_response("working on boot\n");

        let report = h.runner.run().await;
        assert_eq!(report.reason, TerminationReason::BudgetExhausted);
        assert_eq!(report.iterations, 2);
        assert!(h.root.join(FEATURE_LIST_FILE).exists());

        let prompts = h.cli.prompts();
        assert!(prompts[0].contains("initializer"));
        assert!(prompts[1].contains("coding agent"));
    }

    #[tokio::test]
    async fn full_sign_off_path_is_graceful() {
        let mut h = harness(fast_settings(None));
        write_features(&h.root, &[true]);
        // All features pass, so turn 1 is QA, which approves.
        h.cli.push_response("```write:QA_PASSED\n\n```");
        // Turn 2 is the manager, which signs off.
        h.cli.push_response("```write:PROJECT_SIGNED_OFF\n\n```");
        // Turn 3 is the cleaner.
        h.cli.push_response("```write:cleanup_report.txt\nremoved scratch files\n```");

        let report = h.runner.run().await;
        assert_eq!(report.reason, TerminationReason::SignedOff);
        assert!(report.reason.is_graceful());
        assert_eq!(report.iterations, 3);

        let prompts = h.cli.prompts();
        assert!(prompts[0].contains("QA agent"));
        assert!(prompts[1].contains("engineering manager"));
        assert!(prompts[2].contains("cleanup agent"));
    }

    #[tokio::test]
    async fn consecutive_failures_terminate_the_loop() {
        let mut h = harness(fast_settings(None));
        write_features(&h.root, &[false]);
        h.cli.push_failure("model down");
        h.cli.push_failure("model down");
        h.cli.push_failure("model down");

        let report = h.runner.run().await;
        assert_eq!(report.reason, TerminationReason::ConsecutiveErrors(3));
        assert!(!report.reason.is_graceful());
    }

    #[tokio::test]
    async fn a_successful_turn_resets_the_error_streak() {
        let mut h = harness(fast_settings(Some(4)));
        write_features(&h.root, &[false]);
        h.cli.push_failure("hiccup");
        h.cli.push_response("recovered\n");
        h.cli.push_failure("hiccup");
        h.cli.push_response("recovered again\n");

        let report = h.runner.run().await;
        // Two isolated failures never reach the streak limit of three.
        assert_eq!(report.reason, TerminationReason::BudgetExhausted);
    }

    #[tokio::test]
    async fn stop_command_halts_before_any_turn() {
        let mut h = harness(fast_settings(None));
        write_features(&h.root, &[false]);
        h.control.apply(ControlCommand::Stop);

        let report = h.runner.run().await;
        assert_eq!(report.reason, TerminationReason::StopRequested);
        assert_eq!(report.iterations, 0);
        assert!(h.cli.prompts().is_empty());
    }

    #[tokio::test]
    async fn human_in_loop_file_surfaces_its_reason() {
        let mut h = harness(fast_settings(None));
        write_features(&h.root, &[false]);
        std::fs::write(h.root.join(HUMAN_IN_LOOP_FILE), "need production credentials\n").unwrap();

        let report = h.runner.run().await;
        assert_eq!(
            report.reason,
            TerminationReason::HumanInLoop("need production credentials".to_string())
        );
    }

    #[tokio::test]
    async fn a_response_without_blocks_still_counts_the_iteration() {
        let mut h = harness(fast_settings(Some(1)));
        write_features(&h.root, &[false]);
        h.cli.push_response("I thought about it but took no action.");

        let report = h.runner.run().await;
        assert_eq!(report.iterations, 1);
        assert_eq!(report.reason, TerminationReason::BudgetExhausted);
    }

    #[tokio::test]
    async fn fresh_start_clears_stale_sentinels() {
        let mut h = harness(fast_settings(Some(1)));
        // No feature list: first run. Stale markers from a dead run linger.
        std::fs::write(h.root.join(SENTINEL_SIGNED_OFF), "").unwrap();
        std::fs::write(h.root.join(SENTINEL_QA_PASSED), "").unwrap();
        h.cli.push_response("scaffolding...\n");

        let _ = h.runner.run().await;
        assert!(!h.root.join(SENTINEL_SIGNED_OFF).exists());
        assert!(!h.root.join(SENTINEL_QA_PASSED).exists());
    }

    #[tokio::test]
    async fn budget_grace_admits_a_turn_while_cleanup_is_owed() {
        let mut h = harness(AgentSettings {
            max_iterations: Some(0),
            cleanup_grace_turns: 2,
            auto_continue_delay_secs: 0,
            manager_frequency: 100,
            ..AgentSettings::default()
        });
        write_features(&h.root, &[true]);
        // Signed off in a previous run with cleanup still owed. A restart
        // resets QA freshness, so the grace turn goes to re-verification,
        // not straight to the cleaner; what matters here is that the
        // exhausted budget still admits it.
        std::fs::write(h.root.join(SENTINEL_SIGNED_OFF), "").unwrap();
        h.cli.push_response("```write:cleanup_report.txt\ndone\n```");
        h.cli.push_response("noop");

        let report = h.runner.run().await;
        // One extra turn ran; once the cleanup report exists the budget
        // halt fires.
        assert_eq!(report.iterations, 1);
        assert_eq!(report.reason, TerminationReason::BudgetExhausted);
        assert!(h.root.join(CLEANUP_REPORT_FILE).exists());
    }
}
