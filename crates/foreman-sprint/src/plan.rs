//! Sprint plan loading.
//!
//! The planner session is expected to write `sprint_plan.json` into the
//! workspace. Some models instead leave the plan inside a fenced block in
//! the response text, so [`SprintPlan::load_or_recover`] falls back to
//! extracting the first ```` ```json ```` (or
//! ```` ```write:sprint_plan.json ````) block and persisting it before
//! parsing.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{GraphError, PlanError};
use crate::graph::{Task, TaskGraph};

static PLAN_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json|write:sprint_plan\.json)\n([\s\S]*?)\n```").unwrap()
});

/// A parsed sprint plan: the goal line plus the task list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SprintPlan {
    /// One-line statement of what this sprint should achieve.
    pub sprint_goal: String,
    /// Schedulable tasks, dependencies by id.
    pub tasks: Vec<Task>,
}

impl SprintPlan {
    /// Parse a plan from raw JSON.
    pub fn from_json(raw: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load the plan from `path`, falling back to recovering a fenced JSON
    /// block from `response` when the file was never written. A recovered
    /// plan is persisted to `path` so later phases see a consistent file.
    pub fn load_or_recover(path: &Path, response: &str) -> Result<Self, PlanError> {
        if !path.exists() {
            warn!(path = %path.display(), "sprint plan file not found, trying the response text");
            let Some(captures) = PLAN_BLOCK.captures(response) else {
                return Err(PlanError::Missing);
            };
            let recovered = &captures[1];
            std::fs::write(path, recovered)?;
            info!("recovered sprint plan from a fenced block in the response");
        }
        let raw = std::fs::read_to_string(path)?;
        let plan = Self::from_json(&raw)?;
        info!(tasks = plan.tasks.len(), goal = %plan.sprint_goal, "sprint plan loaded");
        Ok(plan)
    }

    /// Build the validated task graph for this plan.
    pub fn into_graph(self) -> Result<TaskGraph, GraphError> {
        let graph = TaskGraph::new(self.tasks)?;
        graph.validate()?;
        Ok(graph)
    }
}
