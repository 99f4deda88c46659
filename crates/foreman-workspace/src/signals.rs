//! Sentinel signal store.
//!
//! Sentinels are the only cross-restart state the lifecycle machine trusts.
//! They live behind [`SignalStore`] so the state machine can be driven by an
//! in-memory map in tests instead of a real filesystem.

use std::collections::HashSet;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::WorkspaceError;

/// Key-existence store for sentinel markers.
///
/// Implementations must treat *presence* as the entire signal; content is
/// never read.
pub trait SignalStore: Send + Sync {
    /// Whether the named sentinel exists.
    fn is_set(&self, name: &str) -> bool;

    /// Create the named sentinel (idempotent).
    fn set(&self, name: &str) -> Result<(), WorkspaceError>;

    /// Remove the named sentinel (idempotent).
    fn clear(&self, name: &str) -> Result<(), WorkspaceError>;

    /// Remove the sentinel and report whether it was present.
    ///
    /// Used for consume-on-observe markers like `TRIGGER_MANAGER`.
    fn take(&self, name: &str) -> Result<bool, WorkspaceError> {
        let present = self.is_set(name);
        if present {
            self.clear(name)?;
        }
        Ok(present)
    }
}

/// Sentinels as zero-byte files at the workspace root.
#[derive(Debug)]
pub struct FsSignalStore {
    root: PathBuf,
}

impl FsSignalStore {
    /// Create a store rooted at the workspace directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl SignalStore for FsSignalStore {
    fn is_set(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    fn set(&self, name: &str) -> Result<(), WorkspaceError> {
        let path = self.path(name);
        std::fs::write(&path, b"").map_err(|e| WorkspaceError::io(&path, e))?;
        debug!(sentinel = name, "set");
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<(), WorkspaceError> {
        let path = self.path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(sentinel = name, "cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(&path, e)),
        }
    }
}

/// In-memory signal store for tests.
#[derive(Debug, Default)]
pub struct MemorySignalStore {
    names: Mutex<HashSet<String>>,
}

impl MemorySignalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalStore for MemorySignalStore {
    fn is_set(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    fn set(&self, name: &str) -> Result<(), WorkspaceError> {
        let _ = self.names.lock().insert(name.to_string());
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<(), WorkspaceError> {
        let _ = self.names.lock().remove(name);
        Ok(())
    }
}
