//! Well-known workspace file names and engine defaults.
//!
//! Sentinel files are zero-or-nonzero-byte markers whose *existence* is the
//! signal; their content is never inspected.

/// Sentinel: the coding role believes every feature is done.
pub const SENTINEL_COMPLETED: &str = "COMPLETED";
/// Sentinel: QA approved the project in the current review cycle.
pub const SENTINEL_QA_PASSED: &str = "QA_PASSED";
/// Sentinel: the manager signed the project off.
pub const SENTINEL_SIGNED_OFF: &str = "PROJECT_SIGNED_OFF";
/// Sentinel: force a manager review on the next turn. Consumed when observed.
pub const SENTINEL_TRIGGER_MANAGER: &str = "TRIGGER_MANAGER";

/// The ordered feature-record plan (JSON array).
pub const FEATURE_LIST_FILE: &str = "feature_list.json";
/// Free-text directives written by the manager, read by the next coding turn.
pub const MANAGER_DIRECTIVES_FILE: &str = "manager_directives.txt";
/// Free-text progress log appended by the coding role.
pub const PROGRESS_FILE: &str = "agent_progress.txt";
/// Written by the cleaner role; distinguishes "signed off" from "cleanup done".
pub const CLEANUP_REPORT_FILE: &str = "cleanup_report.txt";
/// Presence halts the loop and surfaces its content as the reason.
pub const HUMAN_IN_LOOP_FILE: &str = "human_in_loop.txt";
/// Persisted loop state so a fresh process can resume.
pub const LOOP_STATE_FILE: &str = ".foreman_state.json";
/// Sprint plan produced by the planning role (JSON).
pub const SPRINT_PLAN_FILE: &str = "sprint_plan.json";

/// Marker a sprint worker emits in its final output on success.
pub const SPRINT_TASK_COMPLETE: &str = "SPRINT_TASK_COMPLETE";
/// Marker prefix a sprint worker emits on failure; the reason follows the colon.
pub const SPRINT_TASK_FAILED: &str = "SPRINT_TASK_FAILED";

/// Capacity of the per-session log ring exposed over the heartbeat channel.
pub const LOG_RING_CAPACITY: usize = 50;

/// Seconds without a heartbeat before a session is reported offline.
pub const HEARTBEAT_STALENESS_SECS: i64 = 15;

// Metric names, shared by every crate that records them and by the
// server that renders them.

/// Interpreter actions executed total (counter, labels: kind, success).
pub const METRIC_ACTIONS_EXECUTED_TOTAL: &str = "actions_executed_total";
/// Interpreter action duration seconds (histogram, labels: kind).
pub const METRIC_ACTION_DURATION_SECONDS: &str = "action_duration_seconds";
/// Session turns total (counter, labels: role).
pub const METRIC_SESSION_TURNS_TOTAL: &str = "session_turns_total";
/// Session turn duration seconds (histogram).
pub const METRIC_TURN_DURATION_SECONDS: &str = "turn_duration_seconds";
/// Sprint tasks total (counter, labels: status).
pub const METRIC_SPRINT_TASKS_TOTAL: &str = "sprint_tasks_total";
/// Heartbeats received total (counter).
pub const METRIC_HEARTBEATS_TOTAL: &str = "heartbeats_total";
/// Control commands queued total (counter, labels: command).
pub const METRIC_COMMANDS_QUEUED_TOTAL: &str = "commands_queued_total";
/// Sessions within the staleness window (gauge).
pub const METRIC_SESSIONS_ONLINE: &str = "sessions_online";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_names_are_distinct() {
        let names = [
            SENTINEL_COMPLETED,
            SENTINEL_QA_PASSED,
            SENTINEL_SIGNED_OFF,
            SENTINEL_TRIGGER_MANAGER,
        ];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            METRIC_ACTIONS_EXECUTED_TOTAL,
            METRIC_ACTION_DURATION_SECONDS,
            METRIC_SESSION_TURNS_TOTAL,
            METRIC_TURN_DURATION_SECONDS,
            METRIC_SPRINT_TASKS_TOTAL,
            METRIC_HEARTBEATS_TOTAL,
            METRIC_COMMANDS_QUEUED_TOTAL,
            METRIC_SESSIONS_ONLINE,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
