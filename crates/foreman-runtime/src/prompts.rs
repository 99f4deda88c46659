//! Role prompt templates.
//!
//! Every prompt spells out the fenced-block protocol the interpreter
//! understands and the sentinel files the role is allowed to touch. The
//! text is deliberately terse; the external model gets its real context
//! from the workspace files the prompt tells it to read.

use std::fmt::Write as _;

use foreman_core::constants::{
    CLEANUP_REPORT_FILE, FEATURE_LIST_FILE, MANAGER_DIRECTIVES_FILE, PROGRESS_FILE,
    SENTINEL_COMPLETED, SENTINEL_QA_PASSED, SENTINEL_SIGNED_OFF, SPRINT_TASK_COMPLETE,
    SPRINT_TASK_FAILED,
};
use foreman_core::roles::Role;
use foreman_sprint::Task;

/// Per-turn context spliced into the role templates.
#[derive(Clone, Debug, Default)]
pub struct PromptContext {
    /// Workspace root, as shown to the model.
    pub workspace: String,
    /// Current `manager_directives.txt` content, if any.
    pub directives: Option<String>,
    /// Tail of the progress log, if any.
    pub progress: Option<String>,
    /// One-line feature tally, e.g. `7/12 passing`.
    pub feature_summary: String,
}

const PROTOCOL: &str = "\
Respond with fenced action blocks, executed in order:\n\
```bash\n<command>\n``` runs a shell command in the workspace.\n\
```write:<path>\n<content>\n``` replaces the file with the complete content.\n\
```read:<path>\n``` returns the file with line numbers.\n\
```search:<query>\n``` searches workspace file contents.\n";

/// Build the prompt for one turn of `role`.
pub fn for_role(role: Role, ctx: &PromptContext) -> String {
    let mut p = String::new();
    let _ = writeln!(p, "Workspace: {}", ctx.workspace);
    p.push_str(PROTOCOL);
    p.push('\n');

    match role {
        Role::Initializer => {
            let _ = writeln!(
                p,
                "You are the project initializer. Read the project spec in this \
                 workspace, then create {FEATURE_LIST_FILE}: a JSON array of \
                 features, each {{\"description\", \"steps\": [..], \"passes\": false}}. \
                 Also create an init script for the project's toolchain. Do not \
                 implement features yet."
            );
        }
        Role::Coding => {
            let _ = writeln!(
                p,
                "You are the coding agent. Features: {}. Pick the next feature \
                 whose \"passes\" is false, implement and verify it, then update \
                 only its \"passes\" flag in {FEATURE_LIST_FILE}. Never remove or \
                 reorder feature records. Append a short note to {PROGRESS_FILE}. \
                 When you believe every feature passes, create the file \
                 {SENTINEL_COMPLETED}.",
                ctx.feature_summary
            );
            if let Some(directives) = &ctx.directives {
                let _ = writeln!(p, "\nManager directives:\n{directives}");
            }
        }
        Role::Manager => {
            let _ = writeln!(
                p,
                "You are the engineering manager. Review {FEATURE_LIST_FILE}, the \
                 recent work, and the test results. Write concrete course \
                 corrections to {MANAGER_DIRECTIVES_FILE}. Only if QA has already \
                 approved (the {SENTINEL_QA_PASSED} file exists) and you agree the \
                 project is finished, create {SENTINEL_SIGNED_OFF}; otherwise do \
                 not create it."
            );
        }
        Role::Qa => {
            let _ = writeln!(
                p,
                "You are the QA agent. Independently verify each feature in \
                 {FEATURE_LIST_FILE} by running the project. If everything truly \
                 works, create the file {SENTINEL_QA_PASSED}. If anything fails, \
                 delete {SENTINEL_COMPLETED}, flip the failing records' \"passes\" \
                 to false (never remove or reorder records), and write what is \
                 broken to {MANAGER_DIRECTIVES_FILE}."
            );
        }
        Role::Cleaner => {
            let _ = writeln!(
                p,
                "You are the cleanup agent. The project is signed off. Remove \
                 scratch files and dead code, make sure the build is clean, then \
                 write a summary of what you removed to {CLEANUP_REPORT_FILE}."
            );
        }
        Role::SprintPlanner | Role::SprintWorker => {
            // These roles use the dedicated builders below.
            let _ = writeln!(p, "You are the {role} agent.");
        }
    }

    if let Some(progress) = &ctx.progress {
        let _ = writeln!(p, "\nRecent progress:\n{progress}");
    }
    p
}

/// Prompt for the sprint planning phase.
pub fn sprint_planner(workspace: &str, feature_list: &str) -> String {
    format!(
        "Workspace: {workspace}\n{PROTOCOL}\n\
         You are the sprint planner. Based on the feature list below, write \
         sprint_plan.json: {{\"sprintGoal\": <string>, \"tasks\": [{{\"id\", \
         \"title\", \"description\", \"dependencies\": [<task ids>]}}]}}. Tasks \
         with no dependency between them may run concurrently, so keep them \
         from touching the same files. Do not write {FEATURE_LIST_FILE}.\n\n\
         Feature list:\n{feature_list}\n"
    )
}

/// Prompt for one sprint worker bound to a single task.
pub fn sprint_worker(workspace: &str, task: &Task) -> String {
    format!(
        "Workspace: {workspace}\n{PROTOCOL}\n\
         You are a sprint worker assigned exactly one task.\n\
         Task {id}: {title}\n{description}\n\n\
         Work only on this task. Never write {FEATURE_LIST_FILE}. When the \
         task is done and verified, end your response with {SPRINT_TASK_COMPLETE}. \
         If you cannot finish it, end with {SPRINT_TASK_FAILED}: <reason>.",
        id = task.id,
        title = task.title,
        description = task.description,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PromptContext {
        PromptContext {
            workspace: "/work/project".to_string(),
            directives: Some("fix the login flow".to_string()),
            progress: Some("added session storage".to_string()),
            feature_summary: "3/5 passing".to_string(),
        }
    }

    #[test]
    fn coding_prompt_carries_directives_and_progress() {
        let p = for_role(Role::Coding, &ctx());
        assert!(p.contains("fix the login flow"));
        assert!(p.contains("added session storage"));
        assert!(p.contains("3/5 passing"));
    }

    #[test]
    fn manager_prompt_gates_sign_off_on_qa() {
        let p = for_role(Role::Manager, &ctx());
        assert!(p.contains(SENTINEL_QA_PASSED));
        assert!(p.contains(SENTINEL_SIGNED_OFF));
    }

    #[test]
    fn worker_prompt_names_both_markers() {
        let task = Task {
            id: "T1".to_string(),
            title: "Wire the API".to_string(),
            description: "Add the /users endpoint".to_string(),
            dependencies: Vec::new(),
            status: foreman_sprint::TaskStatus::Pending,
        };
        let p = sprint_worker("/work/project", &task);
        assert!(p.contains(SPRINT_TASK_COMPLETE));
        assert!(p.contains(SPRINT_TASK_FAILED));
        assert!(p.contains("Wire the API"));
    }
}
