//! Lexical path confinement.
//!
//! Every filesystem action the interpreter executes resolves its path here
//! first. Resolution is purely lexical — `..` components are folded without
//! touching the filesystem — so a traversal attempt fails with
//! [`WorkspaceError::PathEscape`] before anything is opened, and is never
//! silently clamped to the root.

use std::path::{Component, Path, PathBuf};

use crate::errors::WorkspaceError;

/// Resolve a caller-supplied path to an absolute path inside `root`.
///
/// Relative paths resolve against the root. Absolute paths are accepted only
/// when they already point inside the root (the original tooling let the
/// model echo absolute workspace paths back). Anything that folds to a
/// location outside the root is a [`WorkspaceError::PathEscape`].
pub fn resolve_in_root(root: &Path, raw: &str) -> Result<PathBuf, WorkspaceError> {
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let mut folded = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !folded.pop() {
                    return Err(WorkspaceError::PathEscape { path: raw.into() });
                }
            }
            other => folded.push(other),
        }
    }

    if folded.starts_with(root) {
        Ok(folded)
    } else {
        Err(WorkspaceError::PathEscape { path: raw.into() })
    }
}
