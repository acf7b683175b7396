use async_trait::async_trait;
use chrono::{DateTime, Utc};

use braid_core::context::StoredContext;
use braid_core::ids::{ContextId, ExecutionId, ItemId};
use braid_core::items::{Item, ItemContent, Part};
use braid_core::messages::ModelMessage;
use braid_core::toolcalls::ToolCall;
use braid_core::tools::ToolSpec;

use crate::error::ReactorError;

/// Everything a reactor gets for one iteration of a turn.
///
/// `reaction_item_id` is allocated by the engine before the first iteration
/// and stays stable across iterations and step retries, so a retried call
/// lands its output on the same persisted item.
#[derive(Clone, Debug)]
pub struct ReactorCall {
    pub context: StoredContext,
    pub trigger: Item,
    pub model: String,
    pub system_prompt: Option<String>,
    /// Model-facing history, oldest first, trigger included.
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolSpec>,
    pub reaction_item_id: ItemId,
    pub execution_id: ExecutionId,
    pub context_id: ContextId,
    pub iteration: u32,
    pub max_model_steps: u32,
    pub silent: bool,
}

/// Token counts reported by a backend, when it reports any.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReactionUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// A reactor's output for one iteration. Transient; the engine persists the
/// assistant item and owns the execution record.
#[derive(Clone, Debug)]
pub struct ReactionResult {
    pub assistant_item: Item,
    pub tool_calls: Vec<ToolCall>,
    pub messages_for_model: Vec<ModelMessage>,
    pub usage: Option<ReactionUsage>,
}

/// Assistant-item fields a scripted step may set; the rest come from the
/// call's template during normalization.
#[derive(Clone, Debug, Default)]
pub struct PartialItem {
    pub id: Option<ItemId>,
    pub parts: Option<Vec<Part>>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A partial reaction as a script step yields it. Absent fields fall back
/// to sane defaults rather than erroring: the item merges over a template
/// keyed to the call's reaction item id, and absent `tool_calls` /
/// `messages_for_model` coerce to empty.
#[derive(Clone, Debug, Default)]
pub struct ScriptedReaction {
    pub item: Option<PartialItem>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub messages_for_model: Option<Vec<ModelMessage>>,
    pub usage: Option<ReactionUsage>,
}

impl ScriptedReaction {
    /// A plain text reply with no tool calls.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            item: Some(PartialItem {
                parts: Some(vec![Part::text(text)]),
                ..PartialItem::default()
            }),
            ..Self::default()
        }
    }

    /// A reply that requests one tool call, recorded both as a pending part
    /// and in the extracted call list.
    pub fn tool_call(
        tool_name: impl Into<String>,
        tool_call_id: braid_core::ids::ToolCallId,
        args: serde_json::Value,
    ) -> Self {
        let tool_name = tool_name.into();
        Self {
            item: Some(PartialItem {
                parts: Some(vec![Part::tool_call(
                    tool_name.clone(),
                    tool_call_id.clone(),
                    args.clone(),
                )]),
                ..PartialItem::default()
            }),
            tool_calls: Some(vec![ToolCall { tool_call_id, tool_name, args }]),
            ..Self::default()
        }
    }

    /// Merge this partial reaction over the call's template.
    pub fn normalize(self, call: &ReactorCall) -> ReactionResult {
        let template = Item::assistant_shell(call.reaction_item_id.clone(), &call.trigger.channel);
        let partial = self.item.unwrap_or_default();

        let assistant_item = Item {
            id: partial.id.unwrap_or(template.id),
            created_at: partial.created_at.unwrap_or(template.created_at),
            content: ItemContent { parts: partial.parts.unwrap_or_default() },
            ..template
        };

        ReactionResult {
            assistant_item,
            tool_calls: self.tool_calls.unwrap_or_default(),
            messages_for_model: self
                .messages_for_model
                .unwrap_or_else(|| call.messages.clone()),
            usage: self.usage,
        }
    }
}

/// The pluggable turn producer. Exactly one operation; implementations are
/// scripted (deterministic, test-facing) or gateway-backed.
#[async_trait]
pub trait Reactor: Send + Sync {
    fn name(&self) -> &str;

    async fn react(&self, call: &ReactorCall) -> Result<ReactionResult, ReactorError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use braid_core::context::StoredContext;

    pub fn call_fixture() -> ReactorCall {
        let context = StoredContext::new(None, serde_json::json!({}));
        let trigger = Item::input_text("web", "hello");
        let messages = braid_core::messages::items_to_model_messages(std::slice::from_ref(&trigger));
        ReactorCall {
            context_id: context.id.clone(),
            context,
            trigger,
            model: "test-model".into(),
            system_prompt: None,
            messages,
            tools: Vec::new(),
            reaction_item_id: ItemId::new(),
            execution_id: ExecutionId::new(),
            iteration: 0,
            max_model_steps: 8,
            silent: false,
        }
    }
}
