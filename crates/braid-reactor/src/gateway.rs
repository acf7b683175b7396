use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use braid_core::items::{Item, ItemContent, Part};
use braid_core::messages::{MessageRole, ModelMessage};
use braid_core::toolcalls::ToolCall;

use crate::error::ReactorError;
use crate::reactor::{ReactionResult, ReactionUsage, Reactor, ReactorCall};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Model-backed reactor for OpenAI-compatible chat-completions gateways.
///
/// One non-streaming POST per iteration; the returned message's content and
/// tool calls become an assistant item with pending tool-call parts. HTTP
/// and network failures propagate so the hosting step runtime retries the
/// whole iteration.
pub struct GatewayReactor {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl GatewayReactor {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Reactor for GatewayReactor {
    fn name(&self) -> &str {
        "gateway"
    }

    #[instrument(skip(self, call), fields(model = %call.model, iteration = call.iteration))]
    async fn react(&self, call: &ReactorCall) -> Result<ReactionResult, ReactorError> {
        let body = build_request_body(call);

        let resp = self
            .client
            .post(self.completions_url())
            .header(
                "authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ReactorError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ReactorError::Gateway { status, body });
        }

        let completion: ChatCompletion = resp
            .json()
            .await
            .map_err(|e| ReactorError::InvalidResponse(e.to_string()))?;

        reaction_from_completion(call, completion)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatToolFunction,
}

#[derive(Serialize)]
struct ChatToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatCompletionMessage,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunctionCall,
}

#[derive(Deserialize)]
struct ChatFunctionCall {
    name: String,
    /// JSON-encoded argument object, per the chat-completions wire format.
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn build_request_body(call: &ReactorCall) -> ChatRequest {
    let mut messages = Vec::with_capacity(call.messages.len() + 1);
    if let Some(system) = &call.system_prompt {
        messages.push(ChatMessage { role: "system", content: system.clone() });
    }
    for msg in &call.messages {
        messages.push(ChatMessage {
            role: role_str(msg.role),
            content: msg.content.clone(),
        });
    }

    ChatRequest {
        model: call.model.clone(),
        messages,
        tools: call
            .tools
            .iter()
            .map(|spec| ChatTool {
                tool_type: "function",
                function: ChatToolFunction {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.input_schema.clone(),
                },
            })
            .collect(),
    }
}

fn reaction_from_completion(
    call: &ReactorCall,
    completion: ChatCompletion,
) -> Result<ReactionResult, ReactorError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ReactorError::InvalidResponse("completion has no choices".into()))?;

    let mut parts = Vec::new();
    if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
        parts.push(Part::text(content));
    }

    let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
    for wire_call in choice.message.tool_calls {
        let args: Value = serde_json::from_str(&wire_call.function.arguments)
            .unwrap_or(Value::String(wire_call.function.arguments));
        let tool_call_id = braid_core::ids::ToolCallId::from_raw(wire_call.id);
        parts.push(Part::tool_call(
            wire_call.function.name.clone(),
            tool_call_id.clone(),
            args.clone(),
        ));
        tool_calls.push(ToolCall {
            tool_call_id,
            tool_name: wire_call.function.name,
            args,
        });
    }

    let template = Item::assistant_shell(call.reaction_item_id.clone(), &call.trigger.channel);
    let assistant_item = Item {
        content: ItemContent { parts },
        ..template
    };

    let mut messages_for_model = Vec::with_capacity(call.messages.len() + 1);
    if let Some(system) = &call.system_prompt {
        messages_for_model.push(ModelMessage::new(MessageRole::System, system.clone()));
    }
    messages_for_model.extend(call.messages.iter().cloned());

    Ok(ReactionResult {
        assistant_item,
        tool_calls,
        messages_for_model,
        usage: completion.usage.map(|u| ReactionUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    })
}
