//! Durable, context-scoped turn orchestration for conversational agents.
//!
//! An inbound [`Item`] triggers the [`ThreadEngine`], which resolves a
//! [`StoredContext`], asks a [`Reactor`] for a reaction, executes and
//! reconciles tool calls against the persisted item, streams typed chunks
//! to a live client, and mirrors the turn's writes to an external system of
//! record. Every I/O-bearing phase is safe to re-run wholesale, so the
//! engine can live inside an at-least-once durable-step runtime.
//!
//! The crates compose bottom-up:
//! - [`braid_core`] — the shared vocabulary: contexts, items, parts, tool
//!   calls, executions, stream chunks, and the reconciliation rules.
//! - [`braid_store`] — the `ThreadStore` persistence boundary and its
//!   SQLite implementation.
//! - [`braid_reactor`] — the `Reactor` trait plus scripted and
//!   gateway-backed implementations.
//! - [`braid_engine`] — the turn state machine, action registry, stream
//!   multiplexer, run-environment registry, and mirror client.
//! - [`braid_telemetry`] — structured logging with a SQLite warn+ sink.

pub use braid_core as core;
pub use braid_engine as engine;
pub use braid_reactor as reactor;
pub use braid_store as store;
pub use braid_telemetry as telemetry;

pub use braid_core::context::{ContextIdentifier, StoredContext};
pub use braid_core::execution::{Execution, ExecutionStatus};
pub use braid_core::ids::{ContextId, ExecutionId, ItemId, RunId, ToolCallId};
pub use braid_core::items::{Item, ItemContent, ItemStatus, ItemType, Part, ToolCallState};
pub use braid_core::toolcalls::{ActionOutcome, ToolCall};
pub use braid_core::tools::ToolSpec;
pub use braid_engine::{
    Action, ActionContext, ActionRegistry, EngineError, EnvRegistry, MirrorClient, MirrorWrite,
    ReactOutcome, ReactParams, RunEnv, ThreadEngine, ThreadStream, TurnOptions,
};
pub use braid_reactor::{
    GatewayReactor, ReactionResult, Reactor, ReactorError, ScriptedReaction, ScriptedReactor,
};
pub use braid_store::{Database, SqliteStore, StoreError, ThreadStore};
