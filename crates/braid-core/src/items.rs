use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::ids::{ItemId, ToolCallId};

/// Settlement state of a tool-call part.
///
/// A call is *settled* once it reached `OutputAvailable` or `OutputError`.
/// The engine derives "did this tool already run" from this persisted state,
/// never from in-memory bookkeeping, so a retried step re-reads the same item
/// and reaches the same conclusion.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolCallState {
    Pending,
    OutputAvailable { output: Value },
    OutputError { error_text: String },
}

impl ToolCallState {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::OutputAvailable { .. } | Self::OutputError { .. })
    }
}

/// One typed fragment of an item's content, in emission order.
///
/// On the wire (store rows, mirror bodies) tool calls use the
/// `"tool-<name>"` discriminator convention inherited from the client
/// protocol. That convention is resolved exactly once, in the serde
/// implementation below; everything in-process works with this enum.
#[derive(Clone, Debug, PartialEq)]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        tool_name: String,
        tool_call_id: ToolCallId,
        args: Value,
        state: ToolCallState,
    },
    ToolResult {
        tool_call_id: ToolCallId,
        output: Value,
    },
    /// Part produced by a reactor that the engine does not interpret.
    /// Preserved verbatim so persistence and mirroring stay lossless.
    Opaque(Value),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(
        tool_name: impl Into<String>,
        tool_call_id: ToolCallId,
        args: Value,
    ) -> Self {
        Self::ToolCall {
            tool_name: tool_name.into(),
            tool_call_id,
            args,
            state: ToolCallState::Pending,
        }
    }

    /// Encode to the wire shape (`{type: "...", ...}`).
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Text { text } => serde_json::json!({ "type": "text", "text": text }),
            Self::Reasoning { text } => {
                serde_json::json!({ "type": "reasoning", "text": text })
            }
            Self::ToolCall { tool_name, tool_call_id, args, state } => {
                let mut map = serde_json::Map::new();
                map.insert("type".into(), format!("tool-{tool_name}").into());
                map.insert(
                    "toolCallId".into(),
                    Value::String(tool_call_id.as_str().to_owned()),
                );
                map.insert("input".into(), args.clone());
                match state {
                    ToolCallState::Pending => {
                        map.insert("state".into(), "input-available".into());
                    }
                    ToolCallState::OutputAvailable { output } => {
                        map.insert("state".into(), "output-available".into());
                        map.insert("output".into(), output.clone());
                    }
                    ToolCallState::OutputError { error_text } => {
                        map.insert("state".into(), "output-error".into());
                        map.insert("errorText".into(), error_text.clone().into());
                    }
                }
                Value::Object(map)
            }
            Self::ToolResult { tool_call_id, output } => serde_json::json!({
                "type": "tool-result",
                "toolCallId": tool_call_id,
                "output": output,
            }),
            Self::Opaque(v) => v.clone(),
        }
    }

    /// Decode from the wire shape. Unknown part types are preserved as
    /// `Opaque`; a malformed tool part (missing call id) is an error.
    pub fn from_wire(v: &Value) -> Result<Self, String> {
        let part_type = v
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "part has no type".to_string())?;

        match part_type {
            "text" | "reasoning" => {
                let text = v
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if part_type == "text" {
                    Ok(Self::Text { text })
                } else {
                    Ok(Self::Reasoning { text })
                }
            }
            "tool-result" => {
                let tool_call_id = wire_tool_call_id(v, part_type)?;
                Ok(Self::ToolResult {
                    tool_call_id,
                    output: v.get("output").cloned().unwrap_or(Value::Null),
                })
            }
            t if t.starts_with("tool-") => {
                let tool_call_id = wire_tool_call_id(v, part_type)?;
                let state = match v.get("state").and_then(Value::as_str) {
                    Some("output-available") => ToolCallState::OutputAvailable {
                        output: v.get("output").cloned().unwrap_or(Value::Null),
                    },
                    Some("output-error") => ToolCallState::OutputError {
                        error_text: v
                            .get("errorText")
                            .and_then(Value::as_str)
                            .unwrap_or("Error")
                            .to_string(),
                    },
                    _ => ToolCallState::Pending,
                };
                Ok(Self::ToolCall {
                    tool_name: t["tool-".len()..].to_string(),
                    tool_call_id,
                    args: v.get("input").cloned().unwrap_or(Value::Null),
                    state,
                })
            }
            _ => Ok(Self::Opaque(v.clone())),
        }
    }
}

fn wire_tool_call_id(v: &Value, part_type: &str) -> Result<ToolCallId, String> {
    v.get("toolCallId")
        .and_then(Value::as_str)
        .map(ToolCallId::from_raw)
        .ok_or_else(|| format!("part {part_type} has no toolCallId"))
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Part::from_wire(&v).map_err(D::Error::custom)
    }
}

/// Role discriminator for items in a context's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    InputText,
    OutputText,
    SystemText,
    ToolResult,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputText => "input_text",
            Self::OutputText => "output_text",
            Self::SystemText => "system_text",
            Self::ToolResult => "tool_result",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Completed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct ItemContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One message/event in a context's ordered history.
///
/// Invariant: `content.parts` preserve emission order. Once an item is
/// completed, its parts may still be amended in place to attach settled
/// tool-call state, but its id and ordering position never change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub channel: String,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub content: ItemContent,
}

impl Item {
    /// An inbound user message on the given channel.
    pub fn input_text(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            item_type: ItemType::InputText,
            channel: channel.into(),
            status: ItemStatus::Completed,
            created_at: Utc::now(),
            content: ItemContent { parts: vec![Part::text(text)] },
        }
    }

    /// An empty assistant item shell with a pre-assigned id. Used as the
    /// normalization template for reactor output.
    pub fn assistant_shell(id: ItemId, channel: impl Into<String>) -> Self {
        Self {
            id,
            item_type: ItemType::OutputText,
            channel: channel.into(),
            status: ItemStatus::Pending,
            created_at: Utc::now(),
            content: ItemContent::default(),
        }
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content.parts {
            if let Part::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}
