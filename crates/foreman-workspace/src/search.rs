//! Recursive content search rooted at the workspace.
//!
//! Backs the interpreter's `search:` action. Matches are rendered in the
//! `path:line: text` shape the external agent already knows from grep, with
//! two lines of context and a hard output truncation.

use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

/// Context lines shown around each match.
const CONTEXT_LINES: usize = 2;
/// Output ceiling in lines; the remainder is summarized.
const MAX_OUTPUT_LINES: usize = 200;

/// Search every text file under `root` for `query` (literal substring).
///
/// Hidden files, hidden directories, and anything under `.git` are skipped,
/// as are files that do not decode as UTF-8. Returns a human-readable
/// report; no matches is a message, not an error.
pub fn search_text(root: &Path, query: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut matches = 0usize;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name().to_string_lossy().as_ref()) || e.depth() == 0);

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue; // binary or unreadable
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        let lines: Vec<&str> = content.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if !line.contains(query) {
                continue;
            }
            matches += 1;
            let start = i.saturating_sub(CONTEXT_LINES);
            let end = (i + CONTEXT_LINES + 1).min(lines.len());
            for (j, ctx) in lines.iter().enumerate().take(end).skip(start) {
                let sep = if j == i { ':' } else { '-' };
                out.push(format!("{rel}{sep}{}{sep} {ctx}", j + 1));
            }
            out.push("--".to_string());
        }
    }

    debug!(query, matches, "search complete");

    if out.is_empty() {
        return format!("No matches found for '{query}'");
    }
    if out.len() > MAX_OUTPUT_LINES {
        let truncated = out.len() - MAX_OUTPUT_LINES;
        out.truncate(MAX_OUTPUT_LINES);
        out.push(format!("... ({truncated} more lines truncated)"));
    }
    out.join("\n")
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
