//! # foreman-workspace
//!
//! The durable Workspace Store: project files plus the control files the
//! orchestration engine trusts across process restarts.
//!
//! - [`paths`]: lexical path confinement — nothing escapes the workspace root
//! - [`store::WorkspaceStore`]: atomic full-file writes, numbered reads,
//!   feature-list persistence
//! - [`signals`]: the [`signals::SignalStore`] sentinel abstraction with
//!   filesystem and in-memory implementations
//! - [`search`]: recursive content search rooted at the workspace

#![deny(unsafe_code)]

pub mod errors;
pub mod paths;
pub mod search;
pub mod signals;
pub mod store;

pub use errors::WorkspaceError;
pub use signals::{FsSignalStore, MemorySignalStore, SignalStore};
pub use store::WorkspaceStore;
