//! Wave-by-wave sprint execution.
//!
//! The scheduler validates the graph, levelizes it into waves, and runs
//! each wave's tasks concurrently through a [`TaskWorker`], bounded by
//! `max_workers`. A worker reports its result by emitting a completion
//! marker in its final output; the scheduler owns marker parsing so every
//! worker implementation stays a dumb session runner.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use foreman_core::constants::{
    METRIC_SPRINT_TASKS_TOTAL, SPRINT_TASK_COMPLETE, SPRINT_TASK_FAILED,
};
use foreman_core::settings::SprintSettings;

use crate::errors::{GraphError, WorkerError};
use crate::graph::{Task, TaskGraph, TaskStatus};

/// Executes one sprint task to completion and returns the final response
/// text. Implementations run an agent session; the scheduler never looks
/// past the returned text.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    /// Run `task` until it signals completion or its turn budget runs out.
    /// The returned string is the session's final output, which may or may
    /// not contain a completion marker.
    async fn run_task(&self, task: &Task, cancel: CancellationToken)
        -> Result<String, WorkerError>;
}

/// How a worker's final output resolves a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskResolution {
    /// Output carried `SPRINT_TASK_COMPLETE`.
    Complete,
    /// Output carried `SPRINT_TASK_FAILED`, with the stated reason.
    Failed(String),
    /// The turn budget elapsed without either marker.
    NoSignal,
}

/// Parse the completion marker out of a worker's final output.
///
/// `SPRINT_TASK_COMPLETE` wins when both markers appear; a model that
/// finished the work and then mused about failure modes should not fail
/// the task.
pub fn parse_resolution(output: &str) -> TaskResolution {
    if output.contains(SPRINT_TASK_COMPLETE) {
        return TaskResolution::Complete;
    }
    if let Some(at) = output.find(SPRINT_TASK_FAILED) {
        let rest = &output[at + SPRINT_TASK_FAILED.len()..];
        let reason = rest
            .strip_prefix(':')
            .unwrap_or(rest)
            .lines()
            .next()
            .unwrap_or("")
            .trim();
        let reason = if reason.is_empty() { "unspecified" } else { reason };
        return TaskResolution::Failed(reason.to_string());
    }
    TaskResolution::NoSignal
}

/// Aggregate result of one sprint cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SprintSummary {
    /// Tasks whose workers signaled completion.
    pub completed: Vec<String>,
    /// Failed tasks with their reasons.
    pub failed: BTreeMap<String, String>,
    /// Tasks never dispatched because a dependency failed.
    pub skipped: Vec<String>,
}

impl SprintSummary {
    /// What the lifecycle layer should do next.
    pub fn verdict(&self) -> SprintVerdict {
        if self.failed.is_empty() {
            SprintVerdict::Replan
        } else {
            SprintVerdict::Escalate
        }
    }
}

/// Next step after a sprint cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SprintVerdict {
    /// Every task completed; plan the next sprint.
    Replan,
    /// At least one task failed; hand control to manager review.
    Escalate,
}

/// Runs sprints: validate, levelize, dispatch, aggregate.
pub struct SprintScheduler {
    settings: SprintSettings,
    cancel: CancellationToken,
}

impl SprintScheduler {
    /// Create a scheduler with the given limits.
    pub fn new(settings: SprintSettings, cancel: CancellationToken) -> Self {
        Self { settings, cancel }
    }

    /// Execute one full sprint cycle over `graph`.
    ///
    /// Validation failures abort before any worker is dispatched. A failed
    /// task marks all its transitive dependents skipped; skipped tasks are
    /// reported in the summary but never handed to a worker.
    #[instrument(skip(self, graph, worker), fields(tasks = graph.len()))]
    pub async fn run(
        &self,
        mut graph: TaskGraph,
        worker: Arc<dyn TaskWorker>,
    ) -> Result<SprintSummary, GraphError> {
        graph.validate()?;
        let waves = graph.compute_waves();
        info!(waves = waves.len(), "sprint waves planned");

        let semaphore = Arc::new(Semaphore::new(self.settings.max_workers.max(1)));
        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut failed: BTreeMap<String, String> = BTreeMap::new();
        let mut skipped: BTreeSet<String> = BTreeSet::new();

        for (wave_index, wave) in waves.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(wave = wave_index, "sprint cancelled, remaining tasks skipped");
                for id in waves.iter().skip(wave_index).flatten() {
                    let _ = skipped.insert(id.clone());
                }
                break;
            }

            let mut joins: JoinSet<(String, Result<String, WorkerError>)> = JoinSet::new();
            for id in wave {
                if skipped.contains(id) {
                    continue;
                }
                // Validation guarantees deps live in earlier waves, so a
                // dependency missing from `completed` here means it failed
                // or was skipped.
                let task = match graph.get_mut(id) {
                    Some(task) => task,
                    None => continue,
                };
                if !task.dependencies.iter().all(|d| completed.contains(d)) {
                    let _ = skipped.insert(id.clone());
                    continue;
                }

                task.status = TaskStatus::Running;
                let task = task.clone();
                let worker = Arc::clone(&worker);
                let semaphore = Arc::clone(&semaphore);
                let cancel = self.cancel.child_token();
                let _ = joins.spawn(async move {
                    let permit = semaphore.acquire_owned().await;
                    if permit.is_err() {
                        return (
                            task.id.clone(),
                            Err(WorkerError::Session("worker pool closed".to_string())),
                        );
                    }
                    info!(task_id = %task.id, title = %task.title, "worker dispatched");
                    let result = worker.run_task(&task, cancel).await;
                    drop(permit);
                    (task.id, result)
                });
            }

            while let Some(join) = joins.join_next().await {
                let (id, result) = match join {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!(error = %err, "worker task panicked");
                        continue;
                    }
                };
                let resolution = match result {
                    Ok(output) => parse_resolution(&output),
                    Err(err) => TaskResolution::Failed(err.to_string()),
                };
                match resolution {
                    TaskResolution::Complete => {
                        info!(task_id = %id, "task completed");
                        counter!(METRIC_SPRINT_TASKS_TOTAL, "status" => "completed").increment(1);
                        if let Some(task) = graph.get_mut(&id) {
                            task.status = TaskStatus::Complete;
                        }
                        let _ = completed.insert(id);
                    }
                    TaskResolution::Failed(reason) => {
                        warn!(task_id = %id, reason = %reason, "task failed");
                        counter!(METRIC_SPRINT_TASKS_TOTAL, "status" => "failed").increment(1);
                        mark_failed(&mut graph, &id, reason, &mut failed, &mut skipped);
                    }
                    TaskResolution::NoSignal => {
                        warn!(task_id = %id, "turn budget elapsed with no completion signal");
                        counter!(METRIC_SPRINT_TASKS_TOTAL, "status" => "failed").increment(1);
                        mark_failed(
                            &mut graph,
                            &id,
                            "NoCompletionSignal".to_string(),
                            &mut failed,
                            &mut skipped,
                        );
                    }
                }
            }
        }

        counter!(METRIC_SPRINT_TASKS_TOTAL, "status" => "skipped").increment(skipped.len() as u64);

        let summary = SprintSummary {
            completed: completed.into_iter().collect(),
            failed,
            skipped: skipped.into_iter().collect(),
        };
        info!(
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "sprint cycle finished"
        );
        Ok(summary)
    }
}

fn mark_failed(
    graph: &mut TaskGraph,
    id: &str,
    reason: String,
    failed: &mut BTreeMap<String, String>,
    skipped: &mut BTreeSet<String>,
) {
    if let Some(task) = graph.get_mut(id) {
        task.status = TaskStatus::Failed;
    }
    let _ = failed.insert(id.to_string(), reason);
    for dependent in graph.transitive_dependents(id) {
        if !failed.contains_key(&dependent) {
            let _ = skipped.insert(dependent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.into(),
            title: format!("task {id}"),
            description: String::new(),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            status: TaskStatus::Pending,
        }
    }

    fn graph(tasks: Vec<Task>) -> TaskGraph {
        TaskGraph::new(tasks).unwrap()
    }

    fn scheduler(max_workers: usize) -> SprintScheduler {
        let settings = SprintSettings {
            max_workers,
            ..SprintSettings::default()
        };
        SprintScheduler::new(settings, CancellationToken::new())
    }

    /// Returns a canned output per task id; unscripted tasks error.
    /// Records every dispatch so tests can assert what never ran.
    struct ScriptedWorker {
        outputs: BTreeMap<String, String>,
        dispatched: Mutex<Vec<String>>,
    }

    impl ScriptedWorker {
        fn new(outputs: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                outputs: outputs
                    .iter()
                    .map(|(id, out)| ((*id).to_string(), (*out).to_string()))
                    .collect(),
                dispatched: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TaskWorker for ScriptedWorker {
        async fn run_task(
            &self,
            task: &Task,
            _cancel: CancellationToken,
        ) -> Result<String, WorkerError> {
            self.dispatched.lock().push(task.id.clone());
            match self.outputs.get(&task.id) {
                Some(out) => Ok(out.clone()),
                None => Err(WorkerError::Session("unscripted task".to_string())),
            }
        }
    }

    // --- marker parsing ---

    #[test]
    fn complete_marker_resolves_complete() {
        assert_eq!(
            parse_resolution("done!\nSPRINT_TASK_COMPLETE\n"),
            TaskResolution::Complete
        );
    }

    #[test]
    fn failed_marker_carries_the_reason() {
        assert_eq!(
            parse_resolution("SPRINT_TASK_FAILED: tests will not pass\nmore text"),
            TaskResolution::Failed("tests will not pass".to_string())
        );
    }

    #[test]
    fn failed_marker_without_reason_is_unspecified() {
        assert_eq!(
            parse_resolution("SPRINT_TASK_FAILED"),
            TaskResolution::Failed("unspecified".to_string())
        );
    }

    #[test]
    fn complete_wins_when_both_markers_appear() {
        assert_eq!(
            parse_resolution("SPRINT_TASK_FAILED: nope\nSPRINT_TASK_COMPLETE"),
            TaskResolution::Complete
        );
    }

    #[test]
    fn no_marker_is_no_signal() {
        assert_eq!(parse_resolution("still working on it"), TaskResolution::NoSignal);
    }

    // --- scheduling ---

    #[tokio::test]
    async fn clean_sprint_completes_everything() {
        let g = graph(vec![task("A", &[]), task("B", &["A"])]);
        let worker = ScriptedWorker::new(&[
            ("A", "SPRINT_TASK_COMPLETE"),
            ("B", "SPRINT_TASK_COMPLETE"),
        ]);

        let summary = scheduler(2).run(g, worker.clone()).await.unwrap();
        assert_eq!(summary.completed, vec!["A".to_string(), "B".to_string()]);
        assert!(summary.failed.is_empty());
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.verdict(), SprintVerdict::Replan);
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents_without_dispatching_them() {
        // A and B run in wave 0; C depends on both. A fails, so C must be
        // reported skipped and its worker never invoked.
        let g = graph(vec![task("A", &[]), task("B", &[]), task("C", &["A", "B"])]);
        let worker = ScriptedWorker::new(&[
            ("A", "SPRINT_TASK_FAILED: schema migration broke"),
            ("B", "SPRINT_TASK_COMPLETE"),
            ("C", "SPRINT_TASK_COMPLETE"),
        ]);

        let summary = scheduler(2).run(g, worker.clone()).await.unwrap();
        assert_eq!(summary.completed, vec!["B".to_string()]);
        assert_eq!(
            summary.failed.get("A").map(String::as_str),
            Some("schema migration broke")
        );
        assert_eq!(summary.skipped, vec!["C".to_string()]);
        assert_eq!(summary.verdict(), SprintVerdict::Escalate);

        let dispatched = worker.dispatched.lock();
        assert!(!dispatched.contains(&"C".to_string()));
    }

    #[tokio::test]
    async fn missing_marker_fails_with_no_completion_signal() {
        let g = graph(vec![task("A", &[])]);
        let worker = ScriptedWorker::new(&[("A", "ran out of turns mid-thought")]);

        let summary = scheduler(1).run(g, worker).await.unwrap();
        assert_eq!(
            summary.failed.get("A").map(String::as_str),
            Some("NoCompletionSignal")
        );
    }

    #[tokio::test]
    async fn worker_error_fails_the_task() {
        let g = graph(vec![task("A", &[])]);
        let worker = ScriptedWorker::new(&[]);

        let summary = scheduler(1).run(g, worker).await.unwrap();
        assert!(summary.failed.contains_key("A"));
        assert_eq!(summary.verdict(), SprintVerdict::Escalate);
    }

    #[tokio::test]
    async fn invalid_graph_aborts_before_any_dispatch() {
        let g = graph(vec![task("A", &["B"]), task("B", &["A"])]);
        let worker = ScriptedWorker::new(&[]);

        let err = scheduler(2).run(g, worker.clone()).await.unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert!(worker.dispatched.lock().is_empty());
    }

    #[tokio::test]
    async fn cancellation_skips_remaining_waves() {
        let g = graph(vec![task("A", &[])]);
        let worker = ScriptedWorker::new(&[("A", "SPRINT_TASK_COMPLETE")]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let sched = SprintScheduler::new(SprintSettings::default(), cancel);
        let summary = sched.run(g, worker.clone()).await.unwrap();

        assert!(summary.completed.is_empty());
        assert_eq!(summary.skipped, vec!["A".to_string()]);
        assert!(worker.dispatched.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_limit_bounds_concurrency() {
        struct CountingWorker {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl TaskWorker for CountingWorker {
            async fn run_task(
                &self,
                _task: &Task,
                _cancel: CancellationToken,
            ) -> Result<String, WorkerError> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok("SPRINT_TASK_COMPLETE".to_string())
            }
        }

        let g = graph(vec![task("A", &[]), task("B", &[]), task("C", &[])]);
        let worker = Arc::new(CountingWorker {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let summary = scheduler(1).run(g, worker.clone()).await.unwrap();
        assert_eq!(summary.completed.len(), 3);
        assert_eq!(worker.peak.load(Ordering::SeqCst), 1);
    }
}
