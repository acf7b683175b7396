use serde::{Deserialize, Serialize};

use crate::items::{Item, ItemType, Part, ToolCallState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One model-facing message, the flattened form the next reactor call sees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ModelMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Converts a context's item history into model messages.
///
/// Text and reasoning parts are joined; settled tool calls are rendered as
/// compact `[tool …]` lines so a following model call sees prior outcomes.
/// Items whose parts render to nothing are skipped.
pub fn items_to_model_messages(items: &[Item]) -> Vec<ModelMessage> {
    items
        .iter()
        .filter_map(|item| {
            let role = match item.item_type {
                ItemType::InputText => MessageRole::User,
                ItemType::OutputText => MessageRole::Assistant,
                ItemType::SystemText => MessageRole::System,
                ItemType::ToolResult => MessageRole::Tool,
            };
            let content = render_parts(&item.content.parts);
            if content.is_empty() {
                None
            } else {
                Some(ModelMessage { role, content })
            }
        })
        .collect()
}

fn render_parts(parts: &[Part]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for part in parts {
        match part {
            Part::Text { text } => {
                if !text.is_empty() {
                    lines.push(text.clone());
                }
            }
            Part::Reasoning { text } => {
                if !text.is_empty() {
                    lines.push(text.clone());
                }
            }
            Part::ToolCall { tool_name, state, .. } => match state {
                ToolCallState::OutputAvailable { output } => {
                    lines.push(format!("[tool {tool_name} output] {output}"));
                }
                ToolCallState::OutputError { error_text } => {
                    lines.push(format!("[tool {tool_name} error] {error_text}"));
                }
                ToolCallState::Pending => {
                    lines.push(format!("[tool {tool_name} pending]"));
                }
            },
            Part::ToolResult { output, .. } => {
                lines.push(format!("[tool result] {output}"));
            }
            Part::Opaque(_) => {}
        }
    }
    lines.join("\n")
}
