//! The turn-execution state machine and its collaborators.
//!
//! An inbound item triggers [`ThreadEngine::react`]: the engine resolves a
//! context, asks a reactor for a reaction, executes and reconciles tool
//! calls, streams partial output, and finally mirrors the turn's writes to
//! an external system of record. Each I/O-bearing phase tolerates being
//! re-run wholesale by a durable-step substrate.

pub mod actions;
pub mod engine;
pub mod env;
pub mod error;
pub mod mirror;
pub mod stream;

pub use actions::{Action, ActionContext, ActionError, ActionRegistry};
pub use engine::{ReactOutcome, ReactParams, ThreadEngine, TurnOptions, TurnPhase};
pub use env::{ConfigError, EnvRegistry, RunEnv, Runtime};
pub use error::EngineError;
pub use mirror::{MirrorClient, MirrorConfig, MirrorError, MirrorWrite};
pub use stream::ThreadStream;
