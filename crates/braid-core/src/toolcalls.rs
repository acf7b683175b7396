//! Tool-call reconciliation.
//!
//! Tool calls are represented as typed parts on an item's content. The
//! engine needs to extract a normalized list of calls from those parts,
//! merge execution outcomes back in, and answer "has this call settled?"
//! from the persisted item rather than from transient state. Keeping these
//! transformations here keeps the engine readable as orchestration and
//! makes them independently testable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ToolCallId;
use crate::items::{Item, Part, ToolCallState};

/// A structured request, embedded in an item's parts, for an action to run.
/// Derived from parts, never stored independently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    pub args: Value,
}

/// Outcome of executing one tool call through the action executor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Success { result: Value },
    Failure { message: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Extracts tool calls from a part sequence, in part order.
///
/// Non-tool parts are ignored; duplicate call ids are preserved as-is
/// (de-duplication is the caller's concern).
pub fn extract_tool_calls(parts: &[Part]) -> Vec<ToolCall> {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::ToolCall { tool_name, tool_call_id, args, .. } => Some(ToolCall {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                args: args.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Applies a tool execution outcome to the matching tool part.
///
/// Pure: returns a new sequence, never mutates the input. Matches on tool
/// name + call id; success settles the part as `output-available`, failure
/// as `output-error`. If no part matches, the input is returned unchanged —
/// that is not an error.
pub fn apply_execution_result(
    parts: &[Part],
    tool_call: &ToolCall,
    outcome: &ActionOutcome,
) -> Vec<Part> {
    parts
        .iter()
        .map(|p| match p {
            Part::ToolCall { tool_name, tool_call_id, args, .. }
                if *tool_name == tool_call.tool_name
                    && *tool_call_id == tool_call.tool_call_id =>
            {
                let state = match outcome {
                    ActionOutcome::Success { result } => {
                        ToolCallState::OutputAvailable { output: result.clone() }
                    }
                    ActionOutcome::Failure { message } => {
                        ToolCallState::OutputError { error_text: message.clone() }
                    }
                };
                Part::ToolCall {
                    tool_name: tool_name.clone(),
                    tool_call_id: tool_call_id.clone(),
                    args: args.clone(),
                    state,
                }
            }
            other => other.clone(),
        })
        .collect()
}

/// True iff some part invokes `tool_name` and its outcome has been
/// persisted (success or failure).
///
/// This predicate — not any in-memory record of calls made — is the source
/// of truth for "did this tool already execute": transient bookkeeping can
/// be lost across a durable-step retry, the persisted item cannot.
pub fn has_settled(item: &Item, tool_name: &str) -> bool {
    item.content.parts.iter().any(|p| {
        matches!(p, Part::ToolCall { tool_name: name, state, .. }
            if name == tool_name && state.is_settled())
    })
}

/// Per-call settlement check, keyed by tool name + call id. Used by the
/// engine to skip re-executing a call after a step retry.
pub fn call_settled(item: &Item, tool_call: &ToolCall) -> bool {
    item.content.parts.iter().any(|p| {
        matches!(p, Part::ToolCall { tool_name, tool_call_id, state, .. }
            if *tool_name == tool_call.tool_name
                && *tool_call_id == tool_call.tool_call_id
                && state.is_settled())
    })
}
