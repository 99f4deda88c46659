//! Persisted loop state.
//!
//! A small JSON file at the workspace root lets a fresh process pick up an
//! interrupted session: iteration counter, error streak, and the recent
//! action history. Sentinels remain the only state the lifecycle machine
//! *trusts*; this file is bookkeeping.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use foreman_core::constants::LOOP_STATE_FILE;

const HISTORY_LIMIT: usize = 10;

/// Turn-loop bookkeeping carried across process restarts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopState {
    /// Completed turns so far.
    pub iteration: u32,
    /// Current run of consecutive failed turns.
    pub consecutive_errors: u32,
    /// Whether the workspace still needs scaffolding.
    pub first_run: bool,
    /// Whether the manager-first trigger has already fired.
    pub manager_ran_first: bool,
    /// Descriptions of the most recent actions, newest last.
    pub recent_history: Vec<String>,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            iteration: 0,
            consecutive_errors: 0,
            first_run: true,
            manager_ran_first: false,
            recent_history: Vec::new(),
        }
    }
}

impl LoopState {
    fn path(root: &Path) -> PathBuf {
        root.join(LOOP_STATE_FILE)
    }

    /// Load state from the workspace root, falling back to defaults.
    /// A corrupt state file is logged and ignored, never fatal.
    pub fn load(root: &Path) -> Self {
        let path = Self::path(root);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Self>(&raw) {
                Ok(state) => {
                    info!(iteration = state.iteration, "resumed loop state");
                    state
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "ignoring corrupt loop state");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the state. Best-effort: a write failure is logged and the
    /// loop carries on with its in-memory copy.
    pub fn save(&self, root: &Path) {
        let path = Self::path(root);
        match serde_json::to_string_pretty(self) {
            Ok(raw) => {
                if let Err(err) = std::fs::write(&path, raw) {
                    warn!(path = %path.display(), error = %err, "failed to save loop state");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize loop state"),
        }
    }

    /// Append action descriptions, keeping only the most recent ten.
    pub fn push_history<I: IntoIterator<Item = String>>(&mut self, lines: I) {
        self.recent_history.extend(lines);
        if self.recent_history.len() > HISTORY_LIMIT {
            let excess = self.recent_history.len() - HISTORY_LIMIT;
            let _ = self.recent_history.drain(..excess);
        }
    }
}
