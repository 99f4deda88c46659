//! Sprint scheduler error types.

use thiserror::Error;

/// Validation failure for a task graph. Fatal before any dispatch — the
/// whole sprint cycle refuses to start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A dependency identifier does not resolve to any task in the graph.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    DanglingDependency {
        /// The task carrying the bad reference.
        task: String,
        /// The identifier that resolves to nothing.
        dependency: String,
    },

    /// The graph contains a dependency cycle.
    #[error("dependency cycle detected through task '{task}'")]
    Cycle {
        /// One task on the cycle.
        task: String,
    },

    /// Two tasks share the same identifier.
    #[error("duplicate task id '{id}'")]
    DuplicateId {
        /// The repeated identifier.
        id: String,
    },
}

/// Failure of a single sprint worker. Recovered locally: the task is marked
/// failed and the sprint continues.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker's session could not run at all (spawn/retry exhaustion).
    #[error("worker session failed: {0}")]
    Session(String),
}

/// Failure to obtain a sprint plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Neither a plan file nor a recoverable JSON block was found.
    #[error("no sprint plan file and no recoverable JSON block in the response")]
    Missing,
    /// The plan content is not valid JSON for [`crate::plan::SprintPlan`].
    #[error("malformed sprint plan: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The plan file could not be read.
    #[error("failed to read sprint plan: {0}")]
    Io(#[from] std::io::Error),
}
