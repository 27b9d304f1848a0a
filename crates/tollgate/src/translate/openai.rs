//! OpenAI chat completions dialect
//!
//! Shared with OpenRouter, which speaks the same grammar plus a routing hint.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::canonical::{
    CanonicalRequest, ContentBlock, MessageContent, MessageResponse, Role, Usage,
};
use super::sse::{StreamEvent, data_payload};
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ChatTool>,
    /// OpenRouter provider routing hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<ChatUsage> for Usage {
    fn from(usage: ChatUsage) -> Self {
        Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// How system blocks become system-role messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStyle {
    /// One system message per block
    PerBlock,
    /// A single system message with blocks joined by blank lines
    Joined,
}

/// Build a chat completions body from a canonical request
pub fn to_chat_request(request: &CanonicalRequest, system_style: SystemStyle) -> ChatRequest {
    let mut messages = Vec::new();

    match system_style {
        SystemStyle::PerBlock => {
            for text in request.system.texts() {
                messages.push(ChatMessage::text("system", text.to_string()));
            }
        }
        SystemStyle::Joined if !request.system.is_empty() => {
            messages.push(ChatMessage::text("system", request.system.joined("\n\n")));
        }
        SystemStyle::Joined => {}
    }

    for message in &request.messages {
        match (&message.content, message.role) {
            (MessageContent::Text(text), role) => {
                messages.push(ChatMessage::text(role.as_str(), text.clone()));
            }
            (MessageContent::Blocks(blocks), Role::User) => {
                push_user_blocks(&mut messages, blocks);
            }
            (MessageContent::Blocks(blocks), Role::Assistant) => {
                push_assistant_blocks(&mut messages, blocks);
            }
        }
    }

    let tools = request
        .tools
        .iter()
        .map(|tool| ChatTool {
            kind: function_kind(),
            function: FunctionDefinition {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            },
        })
        .collect();

    ChatRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stream: request.stream,
        stream_options: request.stream.then(|| json!({"include_usage": true})),
        tools,
        route: None,
    }
}

fn push_user_blocks(messages: &mut Vec<ChatMessage>, blocks: &[ContentBlock]) {
    let mut text = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: t, .. } => text.push(t.as_str()),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => messages.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(tool_result_text(content.as_ref())),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_use_id.clone()),
            }),
            ContentBlock::ToolUse { name, .. } => {
                tracing::debug!(tool = %name, "Dropping tool_use block in user message");
            }
            ContentBlock::Other(value) => {
                tracing::debug!(kind = ?value.get("type"), "Dropping unsupported content block");
            }
        }
    }
    if !text.is_empty() {
        messages.push(ChatMessage::text("user", text.join("\n")));
    }
}

fn push_assistant_blocks(messages: &mut Vec<ChatMessage>, blocks: &[ContentBlock]) {
    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: t, .. } => text.push(t.as_str()),
            ContentBlock::ToolUse { id, name, input, .. } => tool_calls.push(ToolCall {
                id: id.clone(),
                kind: function_kind(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::ToolResult { .. } | ContentBlock::Other(_) => {
                tracing::debug!("Dropping unsupported assistant content block");
            }
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        return;
    }
    messages.push(ChatMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then(|| text.join("\n")),
        tool_calls,
        tool_call_id: None,
    });
}

/// Flatten a tool_result payload to the plain string OpenAI expects
pub(crate) fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// Map an OpenAI finish reason onto a canonical stop reason
pub fn stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

/// Translate a buffered chat completion
pub fn from_chat_response(body: &[u8]) -> Result<MessageResponse> {
    let parsed: ChatResponse = serde_json::from_slice(body)?;
    let mut response = MessageResponse::translated(parsed.id);

    if let Some(choice) = parsed.choices.into_iter().next() {
        if let Some(message) = choice.message {
            if let Some(text) = message.content.filter(|t| !t.is_empty()) {
                response.content.push(ContentBlock::text(text));
            }
            for call in message.tool_calls {
                let input = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({}));
                response
                    .content
                    .push(ContentBlock::tool_use(call.id, call.function.name, input));
            }
        }
        response.stop_reason = choice.finish_reason.as_deref().map(|r| stop_reason(r).to_string());
    }

    response.usage = parsed.usage.map(Usage::from).unwrap_or_default();
    Ok(response)
}

/// Translate one line of an OpenAI stream into canonical events
pub fn stream_line_events(line: &str) -> Vec<StreamEvent> {
    let Some(payload) = data_payload(line) else {
        return Vec::new();
    };
    if payload.is_empty() {
        return Vec::new();
    }
    if payload == "[DONE]" {
        return vec![StreamEvent::message_stop()];
    }

    let chunk: ChatChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!("Dropping malformed OpenAI stream line: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    let mut finish = None;
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::text_delta(0, &text));
        }
        for call in choice.delta.tool_calls {
            let index = call.index + 1;
            let function = call.function.unwrap_or(FunctionDelta {
                name: None,
                arguments: None,
            });
            if let (Some(id), Some(name)) = (call.id, function.name) {
                events.push(StreamEvent::tool_use_start(index, &id, &name));
            }
            if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                events.push(StreamEvent::input_json_delta(index, &arguments));
            }
        }
        finish = choice.finish_reason;
    }

    let usage = chunk.usage.map(Usage::from);
    if finish.is_some() || usage.is_some() {
        events.push(StreamEvent::message_delta(finish.as_deref().map(stop_reason), usage));
    }
    events
}
