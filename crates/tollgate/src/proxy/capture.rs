//! Stream capture for persistence
//!
//! Sees the same canonical SSE bytes the client receives, in the same
//! order, and rebuilds the assistant message from them.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::translate::{LineBuffer, Usage, data_payload};

#[derive(Debug, Clone, PartialEq)]
enum CapturedBlock {
    Text(String),
    ToolUse { id: String, name: String, input_json: String },
}

/// Accumulates a canonical event stream
#[derive(Debug, Default)]
pub struct StreamCapture {
    lines: LineBuffer,
    chunks: Vec<String>,
    blocks: BTreeMap<usize, CapturedBlock>,
    message_id: Option<String>,
    model: Option<String>,
    stop_reason: Option<String>,
    usage: Usage,
}

impl StreamCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes as they were sent to the client
    pub fn push(&mut self, chunk: &[u8]) {
        for line in self.lines.push(chunk) {
            self.observe(line);
        }
    }

    /// Raw non-empty lines seen so far
    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Concatenated text of every text block
    pub fn text(&self) -> String {
        self.blocks
            .values()
            .filter_map(|block| match block {
                CapturedBlock::Text(text) => Some(text.as_str()),
                CapturedBlock::ToolUse { .. } => None,
            })
            .collect()
    }

    /// Assembled message body and the raw line list
    pub fn finish(mut self) -> (Value, Vec<String>) {
        if let Some(rest) = self.lines.finish() {
            self.observe(rest);
        }

        let content: Vec<Value> = self
            .blocks
            .into_values()
            .map(|block| match block {
                CapturedBlock::Text(text) => json!({"type": "text", "text": text}),
                CapturedBlock::ToolUse { id, name, input_json } => json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": parse_tool_input(&input_json),
                }),
            })
            .collect();

        let mut body = Map::new();
        if let Some(id) = self.message_id {
            body.insert("id".to_string(), json!(id));
        }
        body.insert("type".to_string(), json!("message"));
        body.insert("role".to_string(), json!("assistant"));
        body.insert("content".to_string(), Value::Array(content));
        if let Some(model) = self.model {
            body.insert("model".to_string(), json!(model));
        }
        body.insert("stop_reason".to_string(), json!(self.stop_reason));
        body.insert(
            "usage".to_string(),
            json!({
                "input_tokens": self.usage.input_tokens,
                "output_tokens": self.usage.output_tokens
            }),
        );

        (Value::Object(body), self.chunks)
    }

    fn observe(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }

        if let Some(payload) = data_payload(&line) {
            match serde_json::from_str::<Value>(payload) {
                Ok(event) => self.apply(&event),
                Err(e) => tracing::debug!("Unparseable stream line kept raw: {e}"),
            }
        }
        self.chunks.push(line);
    }

    fn apply(&mut self, event: &Value) {
        let index = event["index"].as_u64().unwrap_or(0) as usize;

        match event["type"].as_str() {
            Some("message_start") => {
                let message = &event["message"];
                self.message_id = message["id"].as_str().map(str::to_string);
                self.model = message["model"].as_str().map(str::to_string);
                self.merge_usage(&message["usage"]);
            }
            Some("content_block_start") => {
                let block = &event["content_block"];
                let captured = match block["type"].as_str() {
                    Some("tool_use") => CapturedBlock::ToolUse {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        input_json: String::new(),
                    },
                    Some("text") => CapturedBlock::Text(block["text"].as_str().unwrap_or_default().to_string()),
                    _ => return,
                };
                self.blocks.insert(index, captured);
            }
            Some("content_block_delta") => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        let text = delta["text"].as_str().unwrap_or_default();
                        match self
                            .blocks
                            .entry(index)
                            .or_insert_with(|| CapturedBlock::Text(String::new()))
                        {
                            CapturedBlock::Text(existing) => existing.push_str(text),
                            CapturedBlock::ToolUse { .. } => {}
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(CapturedBlock::ToolUse { input_json, .. }) = self.blocks.get_mut(&index) {
                            input_json.push_str(delta["partial_json"].as_str().unwrap_or_default());
                        }
                    }
                    _ => {}
                }
            }
            Some("message_delta") => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                self.merge_usage(&event["usage"]);
            }
            _ => {}
        }
    }

    fn merge_usage(&mut self, usage: &Value) {
        if let Some(input) = usage["input_tokens"].as_u64().filter(|n| *n > 0) {
            self.usage.input_tokens = input;
        }
        if let Some(output) = usage["output_tokens"].as_u64().filter(|n| *n > 0) {
            self.usage.output_tokens = output;
        }
    }
}

fn parse_tool_input(input_json: &str) -> Value {
    if input_json.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(input_json).unwrap_or_else(|_| Value::String(input_json.to_string()))
}
