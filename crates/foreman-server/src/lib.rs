//! # foreman-server
//!
//! Heartbeat/command channel for running sessions.
//!
//! - HTTP endpoints: heartbeat ingest, dashboard snapshots, command
//!   queues, control, health, Prometheus metrics
//! - Session registry with shallow-merge heartbeat semantics and a JSON
//!   checkpoint flushed in the background
//! - [`client::HeartbeatClient`], the best-effort reqwest client the
//!   runtime embeds
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod client;
pub mod health;
pub mod metrics;
pub mod server;
pub mod state;

pub use client::HeartbeatClient;
pub use server::{AppState, ChannelServer, ServerError};
pub use state::{ChannelRegistry, ControlCommand, HeartbeatUpdate, SessionSnapshot, SessionState};
