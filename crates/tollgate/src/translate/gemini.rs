//! Google Gemini `generateContent` dialect

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

use super::canonical::{
    CanonicalRequest, ContentBlock, MessageContent, MessageResponse, Role, Usage,
    new_tool_use_id,
};
use super::openai::tool_result_text;
use super::sse::{StreamEvent, data_payload};
use crate::error::{Result, TollgateError};

/// JSON-schema keywords Gemini function declarations reject
const UNSUPPORTED_SCHEMA_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "definitions",
    "additionalProperties",
    "patternProperties",
    "default",
    "examples",
    "const",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "format",
    "title",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GeminiTool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl From<UsageMetadata> for Usage {
    fn from(usage: UsageMetadata) -> Self {
        Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        }
    }
}

/// Build a Gemini body from a canonical request.
///
/// The model is not part of the body; it travels in the URL.
pub fn to_generate_request(request: &CanonicalRequest) -> GenerateRequest {
    let tool_names: HashMap<&str, &str> = request
        .messages
        .iter()
        .flat_map(|message| match &message.content {
            MessageContent::Blocks(blocks) => blocks.as_slice(),
            MessageContent::Text(_) => &[][..],
        })
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
            _ => None,
        })
        .collect();

    let mut contents = Vec::new();
    for message in &request.messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "model",
        };

        let parts: Vec<Part> = match &message.content {
            MessageContent::Text(text) => vec![Part::text(text.clone())],
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block_to_part(block, &tool_names))
                .collect(),
        };

        if parts.is_empty() {
            continue;
        }
        contents.push(Content {
            role: Some(role.to_string()),
            parts,
        });
    }

    let system_instruction = (!request.system.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part::text(request.system.joined("\n\n"))],
    });

    let generation_config = (request.temperature.is_some() || request.max_tokens.is_some())
        .then_some(GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
        });

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiTool {
            function_declarations: request
                .tools
                .iter()
                .map(|tool| FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.as_ref().map(clean_schema),
                })
                .collect(),
        }]
    };

    GenerateRequest {
        contents,
        system_instruction,
        generation_config,
        tools,
    }
}

fn block_to_part(block: &ContentBlock, tool_names: &HashMap<&str, &str>) -> Option<Part> {
    match block {
        ContentBlock::Text { text, .. } => Some(Part::text(text.clone())),
        ContentBlock::ToolUse { name, input, .. } => Some(Part {
            function_call: Some(FunctionCall {
                name: name.clone(),
                args: input.clone(),
            }),
            ..Default::default()
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => {
            let Some(name) = tool_names.get(tool_use_id.as_str()) else {
                tracing::debug!(%tool_use_id, "Dropping tool_result without a matching tool_use");
                return None;
            };
            Some(Part {
                function_response: Some(FunctionResponse {
                    name: name.to_string(),
                    response: json!({"content": tool_result_text(content.as_ref())}),
                }),
                ..Default::default()
            })
        }
        ContentBlock::Other(value) => {
            tracing::debug!(kind = ?value.get("type"), "Dropping unsupported content block");
            None
        }
    }
}

/// Strip schema keywords Gemini rejects, recursively.
///
/// `const` is folded into a single-value `enum`. Keys of a `properties` map
/// are property names and are never stripped.
pub fn clean_schema(schema: &Value) -> Value {
    let mut cleaned = schema.clone();
    clean_schema_in_place(&mut cleaned);
    cleaned
}

fn clean_schema_in_place(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(constant) = map.get("const").cloned() {
                map.entry("enum").or_insert_with(|| Value::Array(vec![constant]));
            }
            for keyword in UNSUPPORTED_SCHEMA_KEYWORDS {
                map.remove(*keyword);
            }
            for (key, child) in map.iter_mut() {
                if key == "properties" {
                    clean_properties(child);
                } else {
                    clean_schema_in_place(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(clean_schema_in_place),
        _ => {}
    }
}

fn clean_properties(value: &mut Value) {
    if let Value::Object(properties) = value {
        for schema in properties.values_mut() {
            clean_schema_in_place(schema);
        }
    }
}

fn stop_reason(finish_reason: &str, has_tool_use: bool) -> &'static str {
    if has_tool_use {
        return "tool_use";
    }
    match finish_reason {
        "MAX_TOKENS" => "max_tokens",
        _ => "end_turn",
    }
}

/// Translate a buffered Gemini response.
///
/// `streamGenerateContent` without `alt=sse` returns an array of partial
/// responses; their parts are concatenated and the last usage wins.
pub fn from_generate_response(body: &[u8]) -> Result<MessageResponse> {
    let value: Value = serde_json::from_slice(body)?;
    let pieces: Vec<GenerateResponse> = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?,
        Value::Object(_) => vec![serde_json::from_value(value)?],
        other => {
            return Err(TollgateError::Translation(format!(
                "Unexpected Gemini response shape: {other}"
            )));
        }
    };

    let mut response = MessageResponse::translated(None);
    let mut text = String::new();
    let mut tool_uses = Vec::new();
    let mut finish = None;

    for piece in pieces {
        if let Some(usage) = piece.usage_metadata {
            response.usage = usage.into();
        }
        let Some(candidate) = piece.candidates.into_iter().next() else {
            continue;
        };
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                tool_uses.push(ContentBlock::tool_use(
                    new_tool_use_id(),
                    call.name,
                    object_or_empty(call.args),
                ));
            }
        }
        if candidate.finish_reason.is_some() {
            finish = candidate.finish_reason;
        }
    }

    if !text.is_empty() {
        response.content.push(ContentBlock::text(text));
    }
    let has_tool_use = !tool_uses.is_empty();
    response.content.extend(tool_uses);
    response.stop_reason = finish.map(|f| stop_reason(&f, has_tool_use).to_string());

    Ok(response)
}

fn object_or_empty(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        _ => Value::Object(Map::new()),
    }
}

/// Translate one line of a Gemini `alt=sse` stream into canonical events
pub fn stream_line_events(line: &str) -> Vec<StreamEvent> {
    let Some(payload) = data_payload(line) else {
        return Vec::new();
    };
    if payload.is_empty() {
        return Vec::new();
    }

    let chunk: GenerateResponse = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!("Dropping malformed Gemini stream line: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    let usage = chunk.usage_metadata.map(Usage::from);
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return events;
    };

    let mut has_tool_use = false;
    for (position, part) in candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .enumerate()
    {
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::text_delta(0, &text));
        }
        if let Some(call) = part.function_call {
            has_tool_use = true;
            let index = position + 1;
            events.push(StreamEvent::tool_use_start(index, &new_tool_use_id(), &call.name));
            events.push(StreamEvent::input_json_delta(
                index,
                &object_or_empty(call.args).to_string(),
            ));
        }
    }

    if let Some(finish) = candidate.finish_reason {
        events.push(StreamEvent::message_delta(
            Some(stop_reason(&finish, has_tool_use)),
            usage,
        ));
        events.push(StreamEvent::message_stop());
    }
    events
}
