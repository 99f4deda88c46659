//! Layered configuration for the Foreman engine.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults** — [`ForemanSettings::default()`]
//! 2. **Workspace file** — `foreman.json` at the workspace root, partial
//!    JSON allowed (missing fields keep their defaults)
//! 3. **Environment variables** — `FOREMAN_*` overrides (highest priority)
//!
//! All field names are camelCase on the wire to match the control-file
//! conventions used elsewhere in the workspace.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::retry::RetryConfig;

/// Settings load failure.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON for [`ForemanSettings`].
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        /// Offending path.
        path: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Agent loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Command that launches the external LLM CLI.
    pub cli_command: String,
    /// Extra arguments passed to the CLI before the prompt.
    pub cli_args: Vec<String>,
    /// Per-turn response timeout in seconds.
    pub turn_timeout_secs: u64,
    /// Iteration budget; `None` runs until a terminal state.
    pub max_iterations: Option<u32>,
    /// Extra turns allowed past the budget when sign-off is waiting on cleanup.
    pub cleanup_grace_turns: u32,
    /// Delay between turns in seconds.
    pub auto_continue_delay_secs: u64,
    /// Consecutive turn failures tolerated before terminating.
    pub max_consecutive_errors: u32,
    /// Run a manager review every N iterations.
    pub manager_frequency: u32,
    /// Run the manager before the first coding turn.
    pub manager_first: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            cli_command: "agent-cli".to_string(),
            cli_args: Vec::new(),
            turn_timeout_secs: 600,
            max_iterations: None,
            cleanup_grace_turns: 5,
            auto_continue_delay_secs: 3,
            max_consecutive_errors: 3,
            manager_frequency: 10,
            manager_first: false,
        }
    }
}

/// Command-block interpreter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterpSettings {
    /// Shell command timeout in seconds.
    pub shell_timeout_secs: u64,
    /// Byte ceiling for a single `write:` block.
    pub max_write_bytes: usize,
    /// Environment variables passed through to shell actions. Everything
    /// else is scrubbed.
    pub env_allow_list: Vec<String>,
}

impl Default for InterpSettings {
    fn default() -> Self {
        Self {
            shell_timeout_secs: 120,
            max_write_bytes: 2 * 1024 * 1024,
            env_allow_list: vec![
                "PATH".to_string(),
                "HOME".to_string(),
                "LANG".to_string(),
                "TERM".to_string(),
            ],
        }
    }
}

/// Sprint scheduler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SprintSettings {
    /// Maximum concurrently running workers.
    pub max_workers: usize,
    /// Turn budget per worker before `NoCompletionSignal`.
    pub worker_turn_budget: u32,
}

impl Default for SprintSettings {
    fn default() -> Self {
        Self {
            max_workers: 2,
            worker_turn_budget: 10,
        }
    }
}

/// Heartbeat/command channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Host the channel server binds.
    pub host: String,
    /// Port the channel server binds.
    pub port: u16,
    /// Base URL sessions report heartbeats to.
    pub url: String,
    /// Durable checkpoint file for session state.
    pub checkpoint_file: String,
    /// Seconds without a heartbeat before a session reports offline.
    pub staleness_secs: i64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7654,
            url: "http://127.0.0.1:7654".to_string(),
            checkpoint_file: "channel_state.json".to_string(),
            staleness_secs: crate::constants::HEARTBEAT_STALENESS_SECS,
        }
    }
}

/// Root settings for the Foreman engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForemanSettings {
    /// Agent loop configuration.
    pub agent: AgentSettings,
    /// Interpreter configuration.
    pub interp: InterpSettings,
    /// Sprint scheduler configuration.
    pub sprint: SprintSettings,
    /// Heartbeat/command channel configuration.
    pub channel: ChannelSettings,
    /// External-process retry configuration.
    pub retry: RetryConfig,
}

/// Name of the optional settings file at the workspace root.
pub const SETTINGS_FILE: &str = "foreman.json";

impl ForemanSettings {
    /// Load settings for a workspace: defaults ← `foreman.json` ← env.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(workspace_root: &Path) -> Result<Self, SettingsError> {
        let path = workspace_root.join(SETTINGS_FILE);
        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| SettingsError::Read {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            debug!(path = %path.display(), "no settings file, using defaults");
            Self::default()
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply `FOREMAN_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(cmd) = std::env::var("FOREMAN_CLI_COMMAND") {
            self.agent.cli_command = cmd;
        }
        if let Some(n) = env_parse::<u32>("FOREMAN_MAX_ITERATIONS") {
            self.agent.max_iterations = Some(n);
        }
        if let Some(n) = env_parse::<u32>("FOREMAN_MANAGER_FREQUENCY") {
            self.agent.manager_frequency = n;
        }
        if let Some(n) = env_parse::<usize>("FOREMAN_MAX_WORKERS") {
            self.sprint.max_workers = n;
        }
        if let Ok(url) = std::env::var("FOREMAN_CHANNEL_URL") {
            self.channel.url = url;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = ForemanSettings::default();
        assert_eq!(settings.agent.manager_frequency, 10);
        assert_eq!(settings.sprint.max_workers, 2);
        assert_eq!(settings.channel.staleness_secs, 15);
        assert!(settings.interp.env_allow_list.contains(&"PATH".to_string()));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: ForemanSettings =
            serde_json::from_str(r#"{"sprint": {"maxWorkers": 8}}"#).unwrap();
        assert_eq!(settings.sprint.max_workers, 8);
        assert_eq!(settings.sprint.worker_turn_budget, 10);
        assert_eq!(settings.agent.manager_frequency, 10);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ForemanSettings::load(dir.path()).unwrap();
        assert_eq!(settings.agent.max_consecutive_errors, 3);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{not json").unwrap();
        assert!(ForemanSettings::load(dir.path()).is_err());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"agent": {"managerFrequency": 4, "maxIterations": 20}}"#,
        )
        .unwrap();
        let settings = ForemanSettings::load(dir.path()).unwrap();
        assert_eq!(settings.agent.manager_frequency, 4);
        assert_eq!(settings.agent.max_iterations, Some(20));
    }
}
