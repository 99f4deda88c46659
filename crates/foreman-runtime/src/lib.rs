//! # foreman-runtime
//!
//! The session runner and lifecycle state machine.
//!
//! - [`client`]: the external agent CLI boundary ([`client::AgentCli`]),
//!   a subprocess implementation with bounded exponential-backoff retry,
//!   and a scripted test double
//! - [`lifecycle`]: the `Init → Coding → … → Terminated` state machine,
//!   driven entirely by sentinels, the feature list, and the iteration
//!   counter
//! - [`session`]: the per-turn loop wiring prompts, the interpreter, the
//!   heartbeat channel, and cooperative pause/resume/skip/stop together
//! - [`worker`]: the sprint-mode worker session implementing
//!   [`foreman_sprint::TaskWorker`]
//! - [`control`], [`state`], [`prompts`]: shared control flags, persisted
//!   loop state, and the role prompt templates

#![deny(unsafe_code)]

pub mod client;
pub mod control;
pub mod errors;
pub mod lifecycle;
pub mod prompts;
pub mod session;
pub mod state;
pub mod worker;

pub use client::{AgentCli, CliAgentClient, ScriptedAgentCli};
pub use control::ControlState;
pub use errors::SessionError;
pub use lifecycle::{
    Decision, LifecycleMachine, LifecycleState, Observations, TerminationReason,
};
pub use session::{SessionReport, SessionRunner};
pub use state::LoopState;
pub use worker::SprintTaskWorker;
