//! Lifecycle state machine.
//!
//! Decides which role runs the next turn, driven entirely by sentinel
//! files, the feature list, and the iteration counter. `Init` is the only
//! start state; `Terminated` (directly, or via `SignedOff → Cleanup`) is
//! the only way out.
//!
//! The QA gate is the one stateful subtlety: `SignedOff` is reachable only
//! when `QA_PASSED` was written during the *current* review cycle. A stale
//! approval left over from an earlier cycle, or a `PROJECT_SIGNED_OFF`
//! file planted by hand, does not count; entering QA review clears any
//! existing `QA_PASSED` so approval must be re-earned.

use tracing::{info, warn};

use foreman_core::constants::{
    SENTINEL_COMPLETED, SENTINEL_QA_PASSED, SENTINEL_SIGNED_OFF, SENTINEL_TRIGGER_MANAGER,
};
use foreman_core::features::FeatureList;
use foreman_core::roles::Role;
use foreman_core::settings::AgentSettings;
use foreman_workspace::{SignalStore, WorkspaceError};

/// The machine's states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Workspace not yet scaffolded.
    Init,
    /// Normal feature work.
    Coding,
    /// Manager turn in progress.
    ManagerReview,
    /// QA turn in progress.
    QAReview,
    /// Sign-off accepted; cleanup pending.
    SignedOff,
    /// Cleaner turn in progress.
    Cleanup,
    /// Loop finished.
    Terminated,
}

/// Why the loop halted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// Signed off, cleanup done. The one graceful exit.
    SignedOff,
    /// Configured iteration budget exhausted.
    BudgetExhausted,
    /// A stop command was drained.
    StopRequested,
    /// `human_in_loop.txt` appeared, with its content as the reason.
    HumanInLoop(String),
    /// Too many failed turns in a row.
    ConsecutiveErrors(u32),
    /// Unrecoverable failure (spawn retries exhausted, storage broken).
    Fatal(String),
}

impl TerminationReason {
    /// Whether the process should exit zero.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::SignedOff | Self::StopRequested)
    }
}

/// What the turn loop should do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Run one turn of this role.
    Run(Role),
    /// Stop the loop.
    Halt(TerminationReason),
}

/// Everything the machine reads to make one decision.
pub struct Observations<'a> {
    /// Completed turns so far.
    pub iteration: u32,
    /// Whether the workspace still needs scaffolding.
    pub first_run: bool,
    /// The current feature list (empty when missing).
    pub features: &'a FeatureList,
    /// Sentinel store for the workspace.
    pub signals: &'a dyn SignalStore,
    /// Whether `cleanup_report.txt` exists.
    pub cleanup_done: bool,
}

/// The lifecycle state machine. One instance per session.
pub struct LifecycleMachine {
    state: LifecycleState,
    manager_frequency: u32,
    manager_first: bool,
    manager_ran_first: bool,
    qa_fresh: bool,
}

impl LifecycleMachine {
    /// Start in `Init`.
    pub fn new(settings: &AgentSettings, manager_ran_first: bool) -> Self {
        Self {
            state: LifecycleState::Init,
            manager_frequency: settings.manager_frequency,
            manager_first: settings.manager_first,
            manager_ran_first,
            qa_fresh: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether the manager-first trigger has fired (persisted by the loop).
    pub fn manager_ran_first(&self) -> bool {
        self.manager_ran_first
    }

    /// Whether the machine has reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state == LifecycleState::Terminated
    }

    /// Force the terminal state (budget, stop, fatal failure).
    pub fn terminate(&mut self, reason: &TerminationReason) {
        info!(?reason, "lifecycle terminated");
        self.transition(LifecycleState::Terminated);
    }

    /// Pick the role for the next turn, transitioning state accordingly.
    /// Evaluated once per turn boundary.
    pub fn decide(&mut self, obs: &Observations<'_>) -> Result<Decision, WorkspaceError> {
        if self.is_terminal() {
            return Ok(Decision::Halt(TerminationReason::StopRequested));
        }

        if obs.first_run {
            self.transition(LifecycleState::Init);
            return Ok(Decision::Run(Role::Initializer));
        }

        // Sign-off handling outranks everything else.
        let mut unverified_sign_off = false;
        if obs.signals.is_set(SENTINEL_SIGNED_OFF) {
            if self.sign_off_acceptable(obs) {
                if obs.cleanup_done {
                    self.transition(LifecycleState::SignedOff);
                    self.transition(LifecycleState::Cleanup);
                    self.transition(LifecycleState::Terminated);
                    return Ok(Decision::Halt(TerminationReason::SignedOff));
                }
                self.transition(LifecycleState::SignedOff);
                self.transition(LifecycleState::Cleanup);
                return Ok(Decision::Run(Role::Cleaner));
            }
            warn!("sign-off sentinel present without fresh QA approval, refusing it");
            unverified_sign_off = true;
        }

        // Review triggers.
        let trigger_file = obs.signals.take(SENTINEL_TRIGGER_MANAGER)?;
        let manager_first_due = self.manager_first && !self.manager_ran_first;
        let frequency_hit = self.manager_frequency > 0
            && obs.iteration > 0
            && obs.iteration % self.manager_frequency == 0;
        let all_pass = obs.features.all_passing();
        let completed = obs.signals.is_set(SENTINEL_COMPLETED);

        let review = trigger_file
            || manager_first_due
            || frequency_hit
            || all_pass
            || completed
            || unverified_sign_off;

        if review {
            if manager_first_due {
                self.manager_ran_first = true;
            }
            let forced = trigger_file || manager_first_due;
            let ready_for_qa = completed || unverified_sign_off || !forced;

            if ready_for_qa && !(self.qa_fresh && obs.signals.is_set(SENTINEL_QA_PASSED)) {
                // Approval must be earned inside this cycle; stale files
                // do not count.
                obs.signals.clear(SENTINEL_QA_PASSED)?;
                self.qa_fresh = false;
                self.transition(LifecycleState::QAReview);
                return Ok(Decision::Run(Role::Qa));
            }

            self.transition(LifecycleState::ManagerReview);
            return Ok(Decision::Run(Role::Manager));
        }

        // A coding turn starts a new review cycle.
        self.qa_fresh = false;
        self.transition(LifecycleState::Coding);
        Ok(Decision::Run(Role::Coding))
    }

    /// Digest the signals a completed turn left behind.
    pub fn observe_turn(&mut self, obs: &Observations<'_>) {
        if self.state == LifecycleState::QAReview && obs.signals.is_set(SENTINEL_QA_PASSED) {
            info!("QA approval recorded for this review cycle");
            self.qa_fresh = true;
        }
    }

    fn sign_off_acceptable(&self, obs: &Observations<'_>) -> bool {
        // Already past the gate: keep accepting while cleanup runs.
        if matches!(self.state, LifecycleState::SignedOff | LifecycleState::Cleanup) {
            return true;
        }
        self.qa_fresh && obs.signals.is_set(SENTINEL_QA_PASSED)
    }

    fn transition(&mut self, to: LifecycleState) {
        if self.state != to {
            info!(from = ?self.state, to = ?to, "lifecycle transition");
            self.state = to;
        }
    }
}
