//! `WorkspaceStore` — confined, atomic access to the project directory.
//!
//! All writes are full-file replacements performed as write-temp-then-rename
//! so a crash mid-write can never leave a half-written control file such as
//! `feature_list.json` behind.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use foreman_core::constants::{FEATURE_LIST_FILE, PROGRESS_FILE};
use foreman_core::features::FeatureList;

use crate::errors::WorkspaceError;
use crate::paths::resolve_in_root;

/// Handle to the durable workspace directory.
#[derive(Clone, Debug)]
pub struct WorkspaceStore {
    root: PathBuf,
    max_write_bytes: usize,
}

impl WorkspaceStore {
    /// Create a store rooted at `root` with the given write ceiling.
    pub fn new(root: impl Into<PathBuf>, max_write_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_write_bytes,
        }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path, refusing escapes.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, WorkspaceError> {
        resolve_in_root(&self.root, raw)
    }

    /// Atomically replace a file's content.
    ///
    /// Creates parent directories, writes to a temp file in the target's
    /// directory, then renames over the destination. Rejects payloads above
    /// the ceiling with [`WorkspaceError::PayloadTooLarge`].
    pub async fn write_file(&self, raw_path: &str, content: &str) -> Result<(), WorkspaceError> {
        if content.len() > self.max_write_bytes {
            return Err(WorkspaceError::PayloadTooLarge {
                path: raw_path.into(),
                bytes: content.len(),
                limit: self.max_write_bytes,
            });
        }
        let target = self.resolve(raw_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io(parent, e))?;
        }

        // Temp file lives next to the target so the rename stays on one filesystem.
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let tmp = target.with_file_name(format!(".{file_name}.tmp.{}", std::process::id()));

        fs::write(&tmp, content)
            .await
            .map_err(|e| WorkspaceError::io(&tmp, e))?;
        fs::rename(&tmp, &target)
            .await
            .map_err(|e| WorkspaceError::io(&target, e))?;
        debug!(path = %target.display(), bytes = content.len(), "wrote file");
        Ok(())
    }

    /// Read a file's raw content.
    pub async fn read_file(&self, raw_path: &str) -> Result<String, WorkspaceError> {
        let target = self.resolve(raw_path)?;
        fs::read_to_string(&target)
            .await
            .map_err(|e| WorkspaceError::io(&target, e))
    }

    /// Read a file rendered with 1-based line numbers, the format the
    /// external agent expects back from a `read:` block.
    pub async fn read_numbered(&self, raw_path: &str) -> Result<String, WorkspaceError> {
        let content = self.read_file(raw_path).await?;
        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(i, line)| format!("{:4} | {line}", i + 1))
            .collect();
        Ok(format!("File: {raw_path}\n{}", numbered.join("\n")))
    }

    /// Whether a workspace-relative path exists.
    pub async fn exists(&self, raw_path: &str) -> bool {
        match self.resolve(raw_path) {
            Ok(p) => fs::try_exists(&p).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Load `feature_list.json`. A missing file yields an empty list.
    pub async fn load_features(&self) -> Result<FeatureList, WorkspaceError> {
        let path = self.root.join(FEATURE_LIST_FILE);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(FeatureList::default());
        }
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|e| WorkspaceError::io(&path, e))?;
        serde_json::from_str(&raw).map_err(|source| WorkspaceError::Malformed {
            path: path.display().to_string(),
            source,
        })
    }

    /// Persist the feature list atomically.
    pub async fn save_features(&self, list: &FeatureList) -> Result<(), WorkspaceError> {
        let json = serde_json::to_string_pretty(list).map_err(|source| {
            WorkspaceError::Malformed {
                path: FEATURE_LIST_FILE.to_string(),
                source,
            }
        })?;
        self.write_file(FEATURE_LIST_FILE, &json).await
    }

    /// Apply a feature-list update under the append-only contract.
    ///
    /// Loads the current list, merges (rejecting removals and reorders),
    /// and persists the result.
    pub async fn update_features(&self, updated: FeatureList) -> Result<(), WorkspaceError> {
        let mut current = self.load_features().await?;
        current.merge_update(updated)?;
        self.save_features(&current).await
    }

    /// Last `n` lines of the progress file, or `None` when absent.
    pub async fn progress_tail(&self, n: usize) -> Option<String> {
        let path = self.root.join(PROGRESS_FILE);
        let content = fs::read_to_string(&path).await.ok()?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        Some(lines[start..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use foreman_core::features::FeatureRecord;

    fn store(dir: &tempfile::TempDir) -> WorkspaceStore {
        WorkspaceStore::new(dir.path(), 1024 * 1024)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        ws.write_file("notes/a.txt", "hello\nworld").await.unwrap();
        assert_eq!(ws.read_file("notes/a.txt").await.unwrap(), "hello\nworld");
    }

    #[tokio::test]
    async fn write_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        ws.write_file("a.txt", "a much longer original body").await.unwrap();
        ws.write_file("a.txt", "short").await.unwrap();
        assert_eq!(ws.read_file("a.txt").await.unwrap(), "short");
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        ws.write_file("a.txt", "content").await.unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn oversized_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::new(dir.path(), 8);
        let err = ws.write_file("a.txt", "way too large").await.unwrap_err();
        assert_matches!(err, WorkspaceError::PayloadTooLarge { bytes: 13, limit: 8, .. });
        assert!(!ws.exists("a.txt").await);
    }

    #[tokio::test]
    async fn escaping_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        let err = ws.write_file("../outside.txt", "nope").await.unwrap_err();
        assert_matches!(err, WorkspaceError::PathEscape { .. });
    }

    #[tokio::test]
    async fn read_numbered_formats_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        ws.write_file("a.txt", "first\nsecond").await.unwrap();
        let rendered = ws.read_numbered("a.txt").await.unwrap();
        assert!(rendered.starts_with("File: a.txt\n"));
        assert!(rendered.contains("   1 | first"));
        assert!(rendered.contains("   2 | second"));
    }

    #[tokio::test]
    async fn feature_list_round_trips_byte_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        let body = r#"[{"description":"login","steps":["open"],"passes":false}]"#;
        ws.write_file(FEATURE_LIST_FILE, body).await.unwrap();
        assert_eq!(ws.read_file(FEATURE_LIST_FILE).await.unwrap(), body);

        let list = ws.load_features().await.unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list.records()[0].passes);
    }

    #[tokio::test]
    async fn missing_feature_list_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        assert!(ws.load_features().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_feature_list_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        ws.write_file(FEATURE_LIST_FILE, "{broken").await.unwrap();
        assert_matches!(
            ws.load_features().await.unwrap_err(),
            WorkspaceError::Malformed { .. }
        );
    }

    #[tokio::test]
    async fn update_features_enforces_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        let original = FeatureList::new(vec![
            FeatureRecord { description: "a".into(), steps: vec![], passes: false },
            FeatureRecord { description: "b".into(), steps: vec![], passes: false },
        ]);
        ws.save_features(&original).await.unwrap();

        // Dropping a record must fail and leave the file untouched.
        let truncated = FeatureList::new(vec![FeatureRecord {
            description: "a".into(),
            steps: vec![],
            passes: true,
        }]);
        assert!(ws.update_features(truncated).await.is_err());
        assert_eq!(ws.load_features().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn progress_tail_returns_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ws = store(&dir);
        let body: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        ws.write_file(PROGRESS_FILE, &body).await.unwrap();
        let tail = ws.progress_tail(3).await.unwrap();
        assert_eq!(tail, "line 18\nline 19\nline 20");
    }
}
