//! Workspace store error types.

use thiserror::Error;

use foreman_core::features::FeatureListViolation;

/// Failures raised by the workspace store.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A path resolved outside the workspace root. Never clamped.
    #[error("path escapes the workspace root: {path}")]
    PathEscape {
        /// The offending path as given by the caller.
        path: String,
    },

    /// A write exceeded the configured byte ceiling.
    #[error("write of {bytes} bytes exceeds the {limit}-byte ceiling for {path}")]
    PayloadTooLarge {
        /// The offending path.
        path: String,
        /// Size of the rejected payload.
        bytes: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// Underlying filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// The path involved.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A control file exists but is not valid JSON for its type.
    #[error("malformed control file {path}: {source}")]
    Malformed {
        /// The path involved.
        path: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// An automated role tried to remove or reorder feature records.
    #[error(transparent)]
    FeatureList(#[from] FeatureListViolation),
}

impl WorkspaceError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
