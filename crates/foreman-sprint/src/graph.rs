//! Task graph: validation and wave levelization.
//!
//! Scheduling is topological levelization, not a priority queue: wave *k*
//! holds every task whose dependencies all sit in waves `0..k`. Order
//! *within* a wave is deliberately unspecified; callers must not rely on it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::GraphError;

/// Completion status of one task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet dispatched.
    #[default]
    Pending,
    /// A worker session is executing it.
    Running,
    /// The worker reported `SPRINT_TASK_COMPLETE`.
    Complete,
    /// The worker reported failure, errored, or never signaled completion.
    Failed,
}

/// One schedulable unit of sprint work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the graph.
    pub id: String,
    /// Short title for logs and heartbeats.
    #[serde(default)]
    pub title: String,
    /// Full description handed to the worker's prompt.
    #[serde(default)]
    pub description: String,
    /// Identifiers of tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Current status. Owned by the scheduler while a sprint is active.
    #[serde(default, skip_serializing_if = "is_pending")]
    pub status: TaskStatus,
}

fn is_pending(status: &TaskStatus) -> bool {
    *status == TaskStatus::Pending
}

/// Mapping from task identifier to task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskGraph {
    tasks: BTreeMap<String, Task>,
}

impl TaskGraph {
    /// Build a graph, rejecting duplicate identifiers.
    pub fn new(tasks: Vec<Task>) -> Result<Self, GraphError> {
        let mut map = BTreeMap::new();
        for task in tasks {
            let id = task.id.clone();
            if map.insert(id.clone(), task).is_some() {
                return Err(GraphError::DuplicateId { id });
            }
        }
        Ok(Self { tasks: map })
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the graph holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Mutable task lookup (scheduler bookkeeping).
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// All tasks, keyed by id.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Validate the graph: every dependency resolves, no cycles of any
    /// length (a self-dependency counts). No side effects on failure.
    pub fn validate(&self) -> Result<(), GraphError> {
        for task in self.tasks.values() {
            for dep in &task.dependencies {
                if !self.tasks.contains_key(dep) {
                    return Err(GraphError::DanglingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Iterative DFS, three-color.
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color: BTreeMap<&str, Color> =
            self.tasks.keys().map(|k| (k.as_str(), Color::White)).collect();

        for start in self.tasks.keys() {
            if color[start.as_str()] != Color::White {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            let _ = color.insert(start.as_str(), Color::Gray);
            while let Some(&(node, next_dep)) = stack.last() {
                let deps = &self.tasks[node].dependencies;
                if next_dep < deps.len() {
                    if let Some(frame) = stack.last_mut() {
                        frame.1 += 1;
                    }
                    let dep = deps[next_dep].as_str();
                    match color[dep] {
                        Color::White => {
                            let _ = color.insert(dep, Color::Gray);
                            stack.push((dep, 0));
                        }
                        Color::Gray => {
                            return Err(GraphError::Cycle {
                                task: dep.to_string(),
                            });
                        }
                        Color::Black => {}
                    }
                } else {
                    let _ = color.insert(node, Color::Black);
                    let _ = stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Compute execution waves by levelization.
    ///
    /// `level(t) = 1 + max(level(deps))`; wave *k* is every task at level
    /// *k*. Call [`Self::validate`] first — this assumes an acyclic graph
    /// with resolved references.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut level: BTreeMap<&str, usize> = BTreeMap::new();

        // Tasks are processed repeatedly until levels settle; with no cycles
        // this terminates in at most `len` passes.
        let mut changed = true;
        while changed {
            changed = false;
            for task in self.tasks.values() {
                let deps_level = task
                    .dependencies
                    .iter()
                    .map(|d| level.get(d.as_str()).copied())
                    .collect::<Option<Vec<_>>>()
                    .map(|ls| ls.into_iter().max().map_or(0, |m| m + 1));
                if let Some(l) = deps_level {
                    if level.get(task.id.as_str()) != Some(&l) {
                        let _ = level.insert(task.id.as_str(), l);
                        changed = true;
                    }
                }
            }
        }

        let max_level = level.values().copied().max().unwrap_or(0);
        let mut waves: Vec<Vec<String>> = vec![Vec::new(); if self.tasks.is_empty() { 0 } else { max_level + 1 }];
        for (id, l) in level {
            waves[l].push(id.to_string());
        }
        waves
    }

    /// Every direct or transitive dependent of `id`.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for task in self.tasks.values() {
                if task.dependencies.contains(&current) && out.insert(task.id.clone()) {
                    frontier.push(task.id.clone());
                }
            }
        }
        out
    }
}
