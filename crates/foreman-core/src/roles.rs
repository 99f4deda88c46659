//! Role vocabulary — the prompt/behavior profiles the engine can run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One prompt/behavior profile driving a single turn of the external agent CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// One-time project scaffolding: feature list and init script.
    Initializer,
    /// The default implementation loop.
    Coding,
    /// Periodic review: directives, feature-list verdicts, sign-off.
    Manager,
    /// Independent verification before sign-off.
    Qa,
    /// Post-sign-off cleanup, writes the cleanup report.
    Cleaner,
    /// Produces the sprint task graph.
    SprintPlanner,
    /// Executes one sprint task.
    SprintWorker,
}

impl Role {
    /// Stable lowercase name used in logs, heartbeats, and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializer => "initializer",
            Self::Coding => "coding",
            Self::Manager => "manager",
            Self::Qa => "qa",
            Self::Cleaner => "cleaner",
            Self::SprintPlanner => "sprint_planner",
            Self::SprintWorker => "sprint_worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializer" => Ok(Self::Initializer),
            "coding" => Ok(Self::Coding),
            "manager" => Ok(Self::Manager),
            "qa" => Ok(Self::Qa),
            "cleaner" => Ok(Self::Cleaner),
            "sprint_planner" => Ok(Self::SprintPlanner),
            "sprint_worker" => Ok(Self::SprintWorker),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
