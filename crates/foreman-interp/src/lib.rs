//! # foreman-interp
//!
//! The Command-Block Interpreter: turns one external-agent response into an
//! ordered list of typed [`action::Action`]s and executes them against the
//! workspace store under safety constraints.
//!
//! - [`parser::parse_blocks`]: fenced-block scanner — `bash`, `write:<path>`,
//!   `read:<path>`, `search:<query>`, everything else an explicit `Unknown`
//! - [`process`]: the [`process::ProcessRunner`] boundary with a real tokio
//!   subprocess implementation and a scripted mock
//! - [`interpreter::Interpreter`]: ordered execution with per-action
//!   outcomes; one action's failure never silently cancels the rest

#![deny(unsafe_code)]

pub mod action;
pub mod interpreter;
pub mod parser;
pub mod process;

pub use action::{Action, ActionKind, ActionOutcome};
pub use interpreter::Interpreter;
pub use parser::parse_blocks;
pub use process::{MockProcessRunner, ProcessRunner, ShellOptions, ShellOutput, TokioProcessRunner};
