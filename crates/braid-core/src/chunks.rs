use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ContextId, ToolCallId};

fn default_true() -> bool {
    true
}

/// Typed chunks written to the live output channel during a turn.
///
/// Wire shape is fixed: a `type` tag plus camelCase fields. Chunks flagged
/// `transient` represent internal phase and are not meant to be replayed to
/// a reconnecting client; the context id chunk is deliberately not
/// transient so clients persist it for reconnect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamChunk {
    #[serde(rename = "data-context-id")]
    ContextId {
        #[serde(rename = "contextId")]
        context_id: ContextId,
    },

    #[serde(rename = "data-context-substate")]
    Substate {
        /// Ephemeral phase label (e.g. "actions"); `None` clears it.
        key: Option<String>,
        #[serde(default = "default_true")]
        transient: bool,
    },

    #[serde(rename = "data-thread-ping")]
    Ping {
        label: String,
        #[serde(default = "default_true")]
        transient: bool,
    },

    #[serde(rename = "tool-output-available")]
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: ToolCallId,
        output: Value,
    },

    #[serde(rename = "tool-output-error")]
    ToolOutputError {
        #[serde(rename = "toolCallId")]
        tool_call_id: ToolCallId,
        #[serde(rename = "errorText")]
        error_text: String,
    },

    #[serde(rename = "finish")]
    Finish,
}

impl StreamChunk {
    pub fn context_id(context_id: ContextId) -> Self {
        Self::ContextId { context_id }
    }

    pub fn substate(key: Option<&str>) -> Self {
        Self::Substate { key: key.map(str::to_owned), transient: true }
    }

    pub fn ping(label: &str) -> Self {
        Self::Ping { label: label.to_owned(), transient: true }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Substate { transient, .. } | Self::Ping { transient, .. } => *transient,
            _ => false,
        }
    }

    pub fn chunk_type(&self) -> &'static str {
        match self {
            Self::ContextId { .. } => "data-context-id",
            Self::Substate { .. } => "data-context-substate",
            Self::Ping { .. } => "data-thread-ping",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::ToolOutputError { .. } => "tool-output-error",
            Self::Finish => "finish",
        }
    }
}
