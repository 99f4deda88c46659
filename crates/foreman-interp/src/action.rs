//! Typed actions parsed from an agent response.

use serde::Serialize;

/// One side effect requested by the external agent.
///
/// Produced by [`crate::parser::parse_blocks`]; ordered; immutable once
/// parsed. Unknown block tags become an explicit [`Action::Unknown`] rather
/// than being dropped invisibly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Run a shell command with the workspace as the working directory.
    RunShell {
        /// The command line, as written inside the block.
        command: String,
    },
    /// Replace a file's entire content. Never a partial patch.
    WriteFile {
        /// Workspace-relative (or workspace-absolute) target path.
        path: String,
        /// Complete intended file content.
        content: String,
    },
    /// Read a file back to the agent with line numbers.
    ReadFile {
        /// Target path. The block body is ignored.
        path: String,
    },
    /// Recursive content search rooted at the workspace.
    SearchText {
        /// Literal substring to look for.
        query: String,
    },
    /// A fenced block with a tag the interpreter does not recognize.
    Unknown {
        /// The unrecognized tag, possibly empty for plain fences.
        tag: String,
    },
}

impl Action {
    /// The action's kind, for metrics and outcome reporting.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::RunShell { .. } => ActionKind::Shell,
            Self::WriteFile { .. } => ActionKind::Write,
            Self::ReadFile { .. } => ActionKind::Read,
            Self::SearchText { .. } => ActionKind::Search,
            Self::Unknown { .. } => ActionKind::Unknown,
        }
    }

    /// Short human-readable description for logs and heartbeat history.
    pub fn describe(&self) -> String {
        match self {
            Self::RunShell { command } => {
                let first = command.lines().next().unwrap_or_default();
                format!("Ran Bash: {first}")
            }
            Self::WriteFile { path, .. } => format!("Wrote File: {path}"),
            Self::ReadFile { path } => format!("Read File: {path}"),
            Self::SearchText { query } => format!("Searched: {query}"),
            Self::Unknown { tag } => format!("Skipped Block: {tag}"),
        }
    }
}

/// Action kind label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// `bash` block.
    Shell,
    /// `write:` block.
    Write,
    /// `read:` block.
    Read,
    /// `search:` block.
    Search,
    /// Unrecognized tag.
    Unknown,
}

impl ActionKind {
    /// Stable label used as a metrics dimension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Write => "write",
            Self::Read => "read",
            Self::Search => "search",
            Self::Unknown => "unknown",
        }
    }
}

/// Structured result of executing one action.
#[derive(Clone, Debug, Serialize)]
pub struct ActionOutcome {
    /// Which kind of action ran.
    pub kind: ActionKind,
    /// Log-friendly description of the action.
    pub description: String,
    /// Whether the action succeeded. A shell command that exits nonzero is
    /// still a *successful* action — its output carries the failure for the
    /// role logic to react to.
    pub success: bool,
    /// Captured output on success, or the failure reason.
    pub output: String,
    /// Wall-clock execution time.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_uses_first_command_line() {
        let action = Action::RunShell {
            command: "ls -la\necho second".into(),
        };
        assert_eq!(action.describe(), "Ran Bash: ls -la");
    }

    #[test]
    fn kind_maps_every_variant() {
        assert_eq!(Action::Unknown { tag: "json".into() }.kind(), ActionKind::Unknown);
        assert_eq!(
            Action::SearchText { query: "x".into() }.kind(),
            ActionKind::Search
        );
    }
}
