//! Channel-side session registry.
//!
//! Each running session (a full agent loop or a single sprint worker)
//! reports heartbeats keyed by its session id. The registry keeps one
//! [`SessionState`] per id, shallow-merged on every heartbeat, plus a
//! per-session queue of pending control commands. Iteration counters
//! accumulate across process restarts: a heartbeat whose iteration is
//! lower than the last one seen means the session restarted.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use foreman_core::constants::LOG_RING_CAPACITY;
use foreman_core::ring::LogRing;

/// A control command queued for a session.
///
/// Serialized lowercase on the wire (`"pause"`, `"resume"`, `"skip"`,
/// `"stop"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    /// Defer the next turn until a `Resume` arrives.
    Pause,
    /// Clear a pending pause.
    Resume,
    /// Skip exactly one turn.
    Skip,
    /// Stop the session gracefully at the next turn boundary.
    Stop,
}

impl ControlCommand {
    /// Wire name of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Skip => "skip",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a control command from its wire name.
#[derive(Debug, Error)]
#[error("unknown control command: {0}")]
pub struct ParseCommandError(pub String);

impl FromStr for ControlCommand {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "skip" => Ok(Self::Skip),
            "stop" => Ok(Self::Stop),
            other => Err(ParseCommandError(other.to_string())),
        }
    }
}

/// Partial session update carried by one heartbeat.
///
/// Every field is optional; absent fields leave the stored state
/// untouched. `tool_usage` carries per-turn deltas, not totals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatUpdate {
    /// Role running this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Session-local iteration counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// Whether the loop is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    /// Whether the loop is paused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
    /// Human-readable line describing the current activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    /// Most recent action outcomes, oldest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_log: Option<Vec<String>>,
    /// Action counts for this turn, keyed by action kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_usage: Option<BTreeMap<String, u64>>,
}

/// Everything the channel knows about one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    /// Session id as reported by the runtime.
    pub id: String,
    /// Role last reported.
    pub role: Option<String>,
    /// Iteration counter of the current process.
    pub iteration: u32,
    /// Iterations accumulated across restarts.
    pub total_iterations: u64,
    /// Whether the session is currently running.
    pub is_running: bool,
    /// Whether the session is paused.
    pub is_paused: bool,
    /// Current activity line.
    pub current_task: String,
    /// Bounded ring of recent log lines, oldest first.
    pub last_log: LogRing,
    /// Cumulative action counts keyed by action kind.
    pub tool_usage: BTreeMap<String, u64>,
    /// When the last heartbeat arrived.
    pub last_heartbeat: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            id: String::new(),
            role: None,
            iteration: 0,
            total_iterations: 0,
            is_running: false,
            is_paused: false,
            current_task: "Idle".to_string(),
            last_log: LogRing::with_capacity(LOG_RING_CAPACITY),
            tool_usage: BTreeMap::new(),
            last_heartbeat: DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl SessionState {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    /// Whether the session heartbeat within the staleness window.
    pub fn online(&self, now: DateTime<Utc>, staleness_secs: i64) -> bool {
        now.signed_duration_since(self.last_heartbeat).num_seconds() < staleness_secs
    }

    fn merge(&mut self, update: &HeartbeatUpdate, now: DateTime<Utc>) {
        if let Some(role) = &update.role {
            self.role = Some(role.clone());
        }
        if let Some(iteration) = update.iteration {
            // A lower iteration than last seen means the process restarted;
            // the whole new count is fresh progress.
            let delta = if iteration < self.iteration {
                u64::from(iteration)
            } else {
                u64::from(iteration - self.iteration)
            };
            self.total_iterations += delta;
            self.iteration = iteration;
        }
        if let Some(paused) = update.is_paused {
            self.is_paused = paused;
        }
        if let Some(task) = &update.current_task {
            self.current_task = task.clone();
        }
        if let Some(lines) = &update.last_log {
            self.merge_log(lines);
        }
        if let Some(usage) = &update.tool_usage {
            for (kind, count) in usage {
                *self.tool_usage.entry(kind.clone()).or_insert(0) += count;
            }
        }
        self.last_heartbeat = now;
        // Deliberate exception to the retain-prior merge rule: a heartbeat
        // is proof of life, so an omitted `is_running` means true rather
        // than keeping a stale false from a prior stop or sweep.
        self.is_running = update.is_running.unwrap_or(true);
    }

    /// Append only the lines not already at the tail of the ring.
    ///
    /// Sessions report their full recent history each heartbeat, so
    /// consecutive reports overlap; the longest prefix of `lines` that
    /// matches the ring's tail is skipped.
    fn merge_log(&mut self, lines: &[String]) {
        let ring_len = self.last_log.len();
        let max_overlap = ring_len.min(lines.len());
        let mut overlap = 0;
        for k in (1..=max_overlap).rev() {
            let tail = self.last_log.lines().skip(ring_len - k);
            if tail.eq(lines[..k].iter().map(String::as_str)) {
                overlap = k;
                break;
            }
        }
        self.last_log.extend(lines[overlap..].iter().cloned());
    }
}

/// One dashboard row: the session state plus the derived liveness flag.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Stored session state.
    #[serde(flatten)]
    pub state: SessionState,
    /// Whether the session heartbeat within the staleness window.
    pub online: bool,
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<String, SessionState>,
    queues: BTreeMap<String, VecDeque<ControlCommand>>,
    dirty: bool,
}

/// Thread-safe registry of sessions and their command queues.
///
/// Session state is checkpointed to a JSON file; command queues are
/// volatile and lost on restart.
pub struct ChannelRegistry {
    inner: Mutex<Inner>,
    checkpoint: PathBuf,
    staleness_secs: i64,
}

impl ChannelRegistry {
    /// Create a registry, reloading any checkpoint at `checkpoint`.
    ///
    /// A missing or unreadable checkpoint starts empty; corruption is
    /// logged, never fatal.
    pub fn load_or_default(checkpoint: &Path, staleness_secs: i64) -> Self {
        let sessions = match std::fs::read_to_string(checkpoint) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, SessionState>>(&raw) {
                Ok(sessions) => {
                    info!(count = sessions.len(), "reloaded channel checkpoint");
                    sessions
                }
                Err(err) => {
                    warn!(error = %err, "corrupt channel checkpoint, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            inner: Mutex::new(Inner {
                sessions,
                queues: BTreeMap::new(),
                dirty: false,
            }),
            checkpoint: checkpoint.to_path_buf(),
            staleness_secs,
        }
    }

    /// Merge a heartbeat into the session keyed by `id`, creating it on
    /// first contact.
    pub fn apply_heartbeat(&self, id: &str, update: &HeartbeatUpdate, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionState::new(id));
        session.merge(update, now);
        inner.dirty = true;
    }

    /// Take every queued command for `id`, clearing the queue.
    pub fn drain_commands(&self, id: &str) -> Vec<ControlCommand> {
        let mut inner = self.inner.lock();
        inner
            .queues
            .get_mut(id)
            .map_or_else(Vec::new, |queue| queue.drain(..).collect())
    }

    /// Queue a command for `id`. The queue is created on first use, so
    /// commands can be staged before the session's first heartbeat.
    pub fn queue_command(&self, id: &str, command: ControlCommand) {
        let mut inner = self.inner.lock();
        inner
            .queues
            .entry(id.to_string())
            .or_default()
            .push_back(command);
    }

    /// Snapshot every session with its derived `online` flag.
    pub fn dashboard(&self, now: DateTime<Utc>) -> Vec<SessionSnapshot> {
        let inner = self.inner.lock();
        inner
            .sessions
            .values()
            .map(|state| SessionSnapshot {
                online: state.online(now, self.staleness_secs),
                state: state.clone(),
            })
            .collect()
    }

    /// Number of sessions currently within the staleness window.
    pub fn online_count(&self, now: DateTime<Utc>) -> usize {
        let inner = self.inner.lock();
        inner
            .sessions
            .values()
            .filter(|s| s.online(now, self.staleness_secs))
            .count()
    }

    /// Total number of known sessions, online or not.
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Flip `is_running` off for sessions silent past twice the staleness
    /// window. Sessions are never deleted, their stats survive.
    pub fn sweep_stale(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let mut swept = false;
        for session in inner.sessions.values_mut() {
            if session.is_running && !session.online(now, 2 * self.staleness_secs) {
                info!(id = %session.id, "marking silent session as stopped");
                session.is_running = false;
                swept = true;
            }
        }
        if swept {
            inner.dirty = true;
        }
    }

    /// Write the checkpoint if anything changed since the last flush.
    ///
    /// Serialization happens under the lock, the disk write outside it.
    /// Write failures are logged and retried on the next flush.
    pub fn flush(&self) {
        let payload = {
            let mut inner = self.inner.lock();
            if !inner.dirty {
                return;
            }
            inner.dirty = false;
            serde_json::to_string_pretty(&inner.sessions)
        };
        match payload {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.checkpoint, json) {
                    warn!(
                        path = %self.checkpoint.display(),
                        error = %err,
                        "failed to write channel checkpoint"
                    );
                    self.inner.lock().dirty = true;
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize channel checkpoint"),
        }
    }
}

// --- tests ---
