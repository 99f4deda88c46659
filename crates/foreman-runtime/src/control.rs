//! Shared control flags for a running session.
//!
//! Commands arrive out-of-band (the heartbeat channel, signal handlers)
//! but are only ever *applied* here, and the turn loop observes the flags
//! at its own suspension points. Nothing preempts an in-flight CLI call.

use parking_lot::Mutex;
use tracing::info;

use foreman_server::ControlCommand;

#[derive(Debug, Default)]
struct Flags {
    pause: bool,
    stop: bool,
    skip: bool,
}

/// Cooperative pause/resume/skip/stop state, shared between the turn loop
/// and whatever feeds it commands.
#[derive(Debug, Default)]
pub struct ControlState {
    flags: Mutex<Flags>,
}

impl ControlState {
    /// Create with all flags clear.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one drained command.
    pub fn apply(&self, command: ControlCommand) {
        let mut flags = self.flags.lock();
        match command {
            ControlCommand::Pause => flags.pause = true,
            ControlCommand::Resume => flags.pause = false,
            ControlCommand::Skip => flags.skip = true,
            ControlCommand::Stop => flags.stop = true,
        }
        info!(command = %command, "control command applied");
    }

    /// Whether the session should defer its next turn.
    pub fn pause_requested(&self) -> bool {
        self.flags.lock().pause
    }

    /// Whether the session should halt at the next turn boundary.
    pub fn stop_requested(&self) -> bool {
        self.flags.lock().stop
    }

    /// Consume a pending skip request. Self-clearing: one skip command
    /// skips exactly one turn.
    pub fn take_skip(&self) -> bool {
        let mut flags = self.flags.lock();
        std::mem::take(&mut flags.skip)
    }
}
