//! Fenced-block parser.
//!
//! Scans a response line by line. A line starting with three backticks
//! either opens a block (the rest of the line is the tag) or closes the one
//! currently open. Recognized tags map to concrete [`Action`]s; anything
//! else is consumed and surfaced as [`Action::Unknown`] so it is skipped
//! *visibly*. An unclosed trailing block is discarded — executing a
//! half-received write would corrupt the target file.

use tracing::warn;

use crate::action::Action;

/// Parse one response into its ordered action list.
pub fn parse_blocks(response: &str) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut open: Option<(String, Vec<String>)> = None;

    for line in response.lines() {
        let trimmed = line.trim_start();
        if let Some(marker) = trimmed.strip_prefix("```") {
            match open.take() {
                Some((tag, body)) => actions.push(finish_block(&tag, body)),
                None => open = Some((marker.trim().to_string(), Vec::new())),
            }
            continue;
        }
        if let Some((_, body)) = open.as_mut() {
            body.push(line.to_string());
        }
    }

    if let Some((tag, _)) = open {
        warn!(tag, "unclosed block at end of response, discarded");
    }

    actions
}

fn finish_block(tag: &str, body: Vec<String>) -> Action {
    let content = body.join("\n");
    if tag == "bash" {
        return Action::RunShell { command: content };
    }
    if let Some(path) = tag.strip_prefix("write:") {
        return Action::WriteFile {
            path: path.trim().to_string(),
            content,
        };
    }
    if let Some(path) = tag.strip_prefix("read:") {
        // Body ignored by contract.
        return Action::ReadFile {
            path: path.trim().to_string(),
        };
    }
    if let Some(query) = tag.strip_prefix("search:") {
        return Action::SearchText {
            query: query.trim().to_string(),
        };
    }
    Action::Unknown {
        tag: tag.to_string(),
    }
}
