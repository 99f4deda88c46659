//! # foreman-sprint
//!
//! The Sprint Scheduler: resolves a task dependency graph into a safe
//! concurrent execution plan and aggregates results.
//!
//! - [`graph`]: [`graph::Task`], [`graph::TaskGraph`], validation (cycles
//!   and dangling references rejected before any dispatch), and
//!   topological levelization into waves
//! - [`plan`]: `sprint_plan.json` loading with a fenced-block fallback
//! - [`scheduler`]: wave-by-wave dispatch of [`scheduler::TaskWorker`]s
//!   bounded by a worker limit, completion-marker parsing, and the
//!   [`scheduler::SprintSummary`] handed back to the lifecycle layer

#![deny(unsafe_code)]

pub mod errors;
pub mod graph;
pub mod plan;
pub mod scheduler;

pub use errors::{GraphError, PlanError, WorkerError};
pub use graph::{Task, TaskGraph, TaskStatus};
pub use plan::SprintPlan;
pub use scheduler::{
    parse_resolution, SprintScheduler, SprintSummary, SprintVerdict, TaskResolution, TaskWorker,
};
