//! Turn producers for the thread engine.
//!
//! A [`Reactor`] turns one trigger plus accumulated history into a
//! [`ReactionResult`]: an assistant item, the tool calls the engine should
//! execute, and the exact model-facing messages used. Reactors never touch
//! the store; all persistence happens in the engine.

pub mod error;
pub mod gateway;
pub mod reactor;
pub mod scripted;

pub use error::ReactorError;
pub use gateway::GatewayReactor;
pub use reactor::{PartialItem, ReactionResult, ReactionUsage, Reactor, ReactorCall, ScriptedReaction};
pub use scripted::{ScriptedReactor, ScriptedStep};
