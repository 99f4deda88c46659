//! # foreman-core
//!
//! Foundation types and utilities for the Foreman orchestration engine.
//!
//! This crate provides the shared vocabulary that all other Foreman crates
//! depend on:
//!
//! - **Feature records**: [`features::FeatureRecord`] and the append-only
//!   [`features::FeatureList`] that forms the project's durable plan
//! - **Roles**: [`roles::Role`] — the prompt/behavior profiles driving one
//!   turn of the external agent CLI
//! - **Retry**: [`retry::RetryConfig`] and backoff calculation
//! - **Ring buffer**: [`ring::LogRing`] bounding per-session log history
//! - **Settings**: [`settings::ForemanSettings`] with layered loading
//! - **Logging**: [`logging::init_subscriber`] tracing setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other foreman crates.

#![deny(unsafe_code)]

pub mod constants;
pub mod features;
pub mod logging;
pub mod retry;
pub mod ring;
pub mod roles;
pub mod settings;
