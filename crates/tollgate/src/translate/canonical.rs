//! Canonical (Anthropic Messages) request and response types
//!
//! These are the only shapes the proxy accepts from its client and the only
//! shapes it ever returns. Unknown top-level request fields are kept in
//! `extra` so the Anthropic path re-serializes the body without loss.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Model identifier reported on responses translated from other dialects
pub const CANONICAL_MODEL_ID: &str = "claude-3-5-sonnet-20241022";

/// A parsed `POST /v1/messages` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "SystemPrompt::is_empty")]
    pub system: SystemPrompt,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CanonicalRequest {
    /// Copy of this request addressed to a different model
    pub fn with_model(&self, model: &str) -> Self {
        let mut request = self.clone();
        request.model = model.to_string();
        request
    }
}

/// The `system` field: a bare string or an ordered list of text blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

impl Default for SystemPrompt {
    fn default() -> Self {
        SystemPrompt::Blocks(Vec::new())
    }
}

impl SystemPrompt {
    pub fn is_empty(&self) -> bool {
        match self {
            SystemPrompt::Text(text) => text.is_empty(),
            SystemPrompt::Blocks(blocks) => blocks.is_empty(),
        }
    }

    /// Text of every block, in order. A bare string counts as one block.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            SystemPrompt::Text(text) if text.is_empty() => Vec::new(),
            SystemPrompt::Text(text) => vec![text.as_str()],
            SystemPrompt::Blocks(blocks) => blocks.iter().map(|b| b.text.as_str()).collect(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.texts().len()
    }

    pub fn joined(&self, separator: &str) -> String {
        self.texts().join(separator)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type", default = "text_kind")]
    pub kind: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SystemBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: text_kind(),
            text: text.into(),
            cache_control: None,
            extra: Map::new(),
        }
    }
}

fn text_kind() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            extra: Map::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            extra: Map::new(),
        }
    }
}

/// Message content: plain text or typed blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// The content as blocks; plain text becomes a single text block
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::text(text.clone())],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// All text blocks joined with newlines
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A typed content block.
///
/// Kinds the proxy does not interpret (images, thinking, documents) are
/// kept verbatim in `Other`. Fields of known kinds that the proxy does not
/// read (`cache_control`, `citations`, ...) ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ContentBlock {
    Text {
        text: String,
        extra: Map<String, Value>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
        extra: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: Option<Value>,
        is_error: Option<bool>,
        extra: Map<String, Value>,
    },
    Other(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            extra: Map::new(),
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
            extra: Map::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedBlock {
    Text {
        text: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl TryFrom<Value> for ContentBlock {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let known = matches!(
            value.get("type").and_then(Value::as_str),
            Some("text" | "tool_use" | "tool_result")
        );
        if !known {
            return Ok(ContentBlock::Other(value));
        }

        Ok(match serde_json::from_value(value)? {
            TaggedBlock::Text { text, extra } => ContentBlock::Text { text, extra },
            TaggedBlock::ToolUse {
                id,
                name,
                input,
                extra,
            } => ContentBlock::ToolUse {
                id,
                name,
                input,
                extra,
            },
            TaggedBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                extra,
            } => ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                extra,
            },
        })
    }
}

impl From<ContentBlock> for Value {
    fn from(block: ContentBlock) -> Self {
        let tagged = match block {
            ContentBlock::Other(value) => return value,
            ContentBlock::Text { text, extra } => TaggedBlock::Text { text, extra },
            ContentBlock::ToolUse {
                id,
                name,
                input,
                extra,
            } => TaggedBlock::ToolUse {
                id,
                name,
                input,
                extra,
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                extra,
            } => TaggedBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                extra,
            },
        };
        serde_json::to_value(tagged).unwrap_or(Value::Null)
    }
}

/// A tool the client offers to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A buffered `/v1/messages` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type", default = "message_kind")]
    pub kind: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl MessageResponse {
    /// Empty assistant message carrying the canonical model id
    pub fn translated(id: Option<String>) -> Self {
        Self {
            id: id.unwrap_or_else(new_message_id),
            kind: message_kind(),
            role: Role::Assistant,
            content: Vec::new(),
            model: CANONICAL_MODEL_ID.to_string(),
            stop_reason: None,
            stop_sequence: None,
            usage: Usage::default(),
        }
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn message_kind() -> String {
    "message".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

pub(crate) fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn new_tool_use_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_string_system_and_text_content() {
        let request: CanonicalRequest = serde_json::from_value(json!({
            "model": "claude-3-opus-20240229",
            "system": "Be brief.",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 256
        }))
        .unwrap();

        assert_eq!(request.system.texts(), vec!["Be brief."]);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.messages[0].content.text(), "Hi");
        assert_eq!(request.max_tokens, Some(256));
        assert!(!request.stream);
    }

    #[test]
    fn test_parse_block_system_with_cache_control() {
        let request: CanonicalRequest = serde_json::from_value(json!({
            "model": "claude-3-opus-20240229",
            "system": [
                {"type": "text", "text": "You are Claude Code"},
                {"type": "text", "text": "Review code.", "cache_control": {"type": "ephemeral"}}
            ],
            "messages": []
        }))
        .unwrap();

        assert_eq!(request.system.block_count(), 2);
        let SystemPrompt::Blocks(blocks) = &request.system else {
            panic!("expected blocks");
        };
        assert_eq!(blocks[1].cache_control, Some(json!({"type": "ephemeral"})));
    }

    #[test]
    fn test_unknown_blocks_and_fields_survive_round_trip() {
        let body = json!({
            "model": "claude-3-opus-20240229",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image", "source": {"type": "base64", "data": "AAAA"}},
                    {"type": "text", "text": "What is this?"}
                ]
            }],
            "metadata": {"user_id": "abc"},
            "thinking": {"type": "enabled", "budget_tokens": 1024}
        });

        let request: CanonicalRequest = serde_json::from_value(body.clone()).unwrap();
        assert!(request.extra.contains_key("metadata"));
        let MessageContent::Blocks(blocks) = &request.messages[0].content else {
            panic!("expected blocks");
        };
        assert!(matches!(blocks[0], ContentBlock::Other(_)));

        assert_eq!(serde_json::to_value(&request).unwrap(), body);
    }

    #[test]
    fn test_tool_blocks() {
        let content: MessageContent = serde_json::from_value(json!([
            {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "a.rs"}},
            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "fn main() {}"}
        ]))
        .unwrap();

        let blocks = content.blocks();
        assert_eq!(
            blocks[0],
            ContentBlock::tool_use("toolu_1", "read_file", json!({"path": "a.rs"}))
        );
        assert!(matches!(blocks[1], ContentBlock::ToolResult { .. }));
        assert_eq!(content.text(), "");
    }

    #[test]
    fn test_block_level_fields_survive_round_trip() {
        let body = json!({
            "model": "claude-3-opus-20240229",
            "messages": [
                {
                    "role": "assistant",
                    "content": [
                        {"type": "text", "text": "Listing.", "citations": [{"cited_text": "x"}]},
                        {
                            "type": "tool_use",
                            "id": "t1",
                            "name": "ls",
                            "input": {},
                            "cache_control": {"type": "ephemeral"}
                        }
                    ]
                },
                {
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": "t1",
                        "content": "a.rs",
                        "cache_control": {"type": "ephemeral"}
                    }]
                }
            ],
            "system": [{"type": "text", "text": "Be brief.", "citations": null}]
        });

        let request: CanonicalRequest = serde_json::from_value(body.clone()).unwrap();
        let MessageContent::Blocks(blocks) = &request.messages[1].content else {
            panic!("expected blocks");
        };
        let ContentBlock::ToolResult { extra, .. } = &blocks[0] else {
            panic!("expected tool_result");
        };
        assert_eq!(extra["cache_control"], json!({"type": "ephemeral"}));
        assert!(!extra.contains_key("type"));

        assert_eq!(serde_json::to_value(&request).unwrap(), body);
    }

    #[test]
    fn test_malformed_known_block_is_an_error() {
        let result: Result<ContentBlock, _> =
            serde_json::from_value(json!({"type": "tool_use", "name": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_translated_response_defaults() {
        let response = MessageResponse::translated(None);
        assert!(response.id.starts_with("msg_"));
        assert_eq!(response.model, CANONICAL_MODEL_ID);
        assert_eq!(response.role, Role::Assistant);
        assert!(response.content.is_empty());
        assert_eq!(response.usage, Usage::default());

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["role"], "assistant");
    }
}
