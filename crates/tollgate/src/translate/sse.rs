//! Canonical server-sent event helpers
//!
//! Events are encoded as `event: <type>\ndata: <json>\n\n`.

use bytes::Bytes;
use serde_json::{Value, json};

use super::canonical::{CANONICAL_MODEL_ID, Usage};

/// One canonical streaming event
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub event: String,
    pub data: Value,
}

impl StreamEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    pub fn message_start(id: &str) -> Self {
        Self::new(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": CANONICAL_MODEL_ID,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0}
                }
            }),
        )
    }

    pub fn text_block_start(index: usize) -> Self {
        Self::new(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "text", "text": ""}
            }),
        )
    }

    pub fn text_delta(index: usize, text: &str) -> Self {
        Self::new(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "text_delta", "text": text}
            }),
        )
    }

    pub fn tool_use_start(index: usize, id: &str, name: &str) -> Self {
        Self::new(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}
            }),
        )
    }

    pub fn input_json_delta(index: usize, partial_json: &str) -> Self {
        Self::new(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "input_json_delta", "partial_json": partial_json}
            }),
        )
    }

    pub fn block_stop(index: usize) -> Self {
        Self::new(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": index}),
        )
    }

    pub fn message_delta(stop_reason: Option<&str>, usage: Option<Usage>) -> Self {
        let mut data = json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": null}
        });
        if let Some(usage) = usage {
            data["usage"] = json!({
                "input_tokens": usage.input_tokens,
                "output_tokens": usage.output_tokens
            });
        }
        Self::new("message_delta", data)
    }

    pub fn message_stop() -> Self {
        Self::new("message_stop", json!({"type": "message_stop"}))
    }

    pub fn error(message: &str) -> Self {
        Self::new(
            "error",
            json!({
                "type": "error",
                "error": {"type": "api_error", "message": message}
            }),
        )
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.event, self.data))
    }
}

/// Encode a batch of events into a single chunk
pub fn encode_events(events: &[StreamEvent]) -> Bytes {
    let mut out = Vec::new();
    for event in events {
        out.extend_from_slice(&event.encode());
    }
    Bytes::from(out)
}

/// Payload of a `data:` line, or `None` for any other line
pub fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    line.strip_prefix("data:").map(str::trim_start)
}

/// Splits an arbitrary byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_delta() {
        let bytes = StreamEvent::text_delta(0, "Hi").encode();
        let text = std::str::from_utf8(&bytes).unwrap();

        assert!(text.starts_with("event: content_block_delta\ndata: "));
        assert!(text.ends_with("\n\n"));
        let payload: Value = serde_json::from_str(text.lines().nth(1).unwrap().trim_start_matches("data: ")).unwrap();
        assert_eq!(payload["delta"]["type"], "text_delta");
        assert_eq!(payload["delta"]["text"], "Hi");
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:[DONE]\r"), Some("[DONE]"));
        assert_eq!(data_payload("event: ping"), None);
        assert_eq!(data_payload(""), None);
    }

    #[test]
    fn test_line_buffer_handles_split_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"te").is_empty());
        assert_eq!(buffer.push(b"xt\":1}\r\n\ndata: x"), vec!["data: {\"text\":1}", ""]);
        assert_eq!(buffer.finish(), Some("data: x".to_string()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_message_delta_with_usage() {
        let event = StreamEvent::message_delta(
            Some("end_turn"),
            Some(Usage {
                input_tokens: 3,
                output_tokens: 7,
            }),
        );
        assert_eq!(event.data["delta"]["stop_reason"], "end_turn");
        assert_eq!(event.data["usage"]["output_tokens"], 7);
    }
}
