//! Wire translation between the canonical dialect and provider dialects
//!
//! Everything here is pure: no I/O, no shared state. Provider bodies are
//! decoded into typed records once at the boundary and converted from there.

mod canonical;
pub mod gemini;
pub mod openai;
mod sse;
mod stream;

pub use canonical::{
    CANONICAL_MODEL_ID, CanonicalRequest, ContentBlock, Message, MessageContent,
    MessageResponse, Role, SystemBlock, SystemPrompt, ToolDefinition, Usage,
};
pub use sse::{LineBuffer, StreamEvent, data_payload, encode_events};
pub use stream::StreamTranslator;

use bytes::Bytes;
use serde_json::Value;

use crate::error::Result;
use openai::SystemStyle;

/// Wire dialect spoken by an upstream provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Anthropic,
    OpenAi,
    Gemini,
    OpenRouter,
}

impl Dialect {
    /// Whether requests and responses need translating at all
    pub fn is_canonical(&self) -> bool {
        matches!(self, Dialect::Anthropic)
    }
}

/// Routing hint OpenRouter uses to fall back across upstream vendors
pub const OPENROUTER_ROUTE: &str = "fallback";

/// Convert a canonical request into the provider's JSON body
pub fn to_provider_request(request: &CanonicalRequest, dialect: Dialect) -> Result<Value> {
    let body = match dialect {
        Dialect::Anthropic => serde_json::to_value(request)?,
        Dialect::OpenAi => {
            serde_json::to_value(openai::to_chat_request(request, SystemStyle::PerBlock))?
        }
        Dialect::OpenRouter => {
            let mut chat = openai::to_chat_request(request, SystemStyle::Joined);
            chat.route = Some(OPENROUTER_ROUTE.to_string());
            serde_json::to_value(chat)?
        }
        Dialect::Gemini => serde_json::to_value(gemini::to_generate_request(request))?,
    };
    Ok(body)
}

/// Convert a buffered provider response body into a canonical response
pub fn from_provider_response(body: &[u8], dialect: Dialect) -> Result<MessageResponse> {
    match dialect {
        Dialect::Anthropic => Ok(serde_json::from_slice(body)?),
        Dialect::OpenAi | Dialect::OpenRouter => openai::from_chat_response(body),
        Dialect::Gemini => gemini::from_generate_response(body),
    }
}

/// Canonical events for one raw line of a provider stream
pub fn stream_line_events(line: &str, dialect: Dialect) -> Vec<StreamEvent> {
    match dialect {
        Dialect::Anthropic => Vec::new(),
        Dialect::OpenAi | Dialect::OpenRouter => openai::stream_line_events(line),
        Dialect::Gemini => gemini::stream_line_events(line),
    }
}

/// Translate one raw stream line into canonical SSE bytes, without any
/// per-stream state. [`StreamTranslator`] builds on this for whole streams.
///
/// Returns `None` for lines that carry nothing for the client (blank lines,
/// comments, role-only chunks, malformed JSON). Anthropic lines are passed
/// through unchanged.
pub fn from_provider_stream_chunk(line: &str, dialect: Dialect) -> Option<Bytes> {
    if dialect.is_canonical() {
        return Some(Bytes::from(format!("{line}\n")));
    }

    let events = stream_line_events(line, dialect);
    if events.is_empty() {
        None
    } else {
        Some(encode_events(&events))
    }
}

/// Whether a raw provider line ends the stream
pub fn is_stream_terminator(line: &str, dialect: Dialect) -> bool {
    match dialect {
        Dialect::OpenAi | Dialect::OpenRouter => data_payload(line) == Some("[DONE]"),
        Dialect::Anthropic | Dialect::Gemini => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single_user_request(model: &str) -> CanonicalRequest {
        CanonicalRequest {
            model: model.to_string(),
            system: SystemPrompt::Text("Be brief.".to_string()),
            messages: vec![Message::user("Say hello")],
            max_tokens: Some(64),
            temperature: None,
            stream: false,
            tools: Vec::new(),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_anthropic_request_is_identity() {
        let request = single_user_request("claude-3-opus-20240229");
        let body = to_provider_request(&request, Dialect::Anthropic).unwrap();
        assert_eq!(body, serde_json::to_value(&request).unwrap());
    }

    #[test]
    fn test_openrouter_adds_route_hint() {
        let body = to_provider_request(&single_user_request("x"), Dialect::OpenRouter).unwrap();
        assert_eq!(body["route"], "fallback");
        assert_eq!(body["messages"][0]["role"], "system");

        let body = to_provider_request(&single_user_request("x"), Dialect::OpenAi).unwrap();
        assert!(body.get("route").is_none());
    }

    #[test]
    fn test_round_trip_mock_echo_per_dialect() {
        let mocked = "Hello from upstream";
        let request = single_user_request("model");

        let cases = [
            (
                Dialect::OpenAi,
                json!({"choices": [{"message": {"role": "assistant", "content": mocked}, "finish_reason": "stop"}]}),
            ),
            (
                Dialect::OpenRouter,
                json!({"choices": [{"message": {"role": "assistant", "content": mocked}}]}),
            ),
            (
                Dialect::Gemini,
                json!({"candidates": [{"content": {"role": "model", "parts": [{"text": mocked}]}}]}),
            ),
        ];

        for (dialect, echo) in cases {
            to_provider_request(&request, dialect).unwrap();
            let response = from_provider_response(echo.to_string().as_bytes(), dialect).unwrap();
            assert_eq!(response.role, Role::Assistant, "{dialect:?}");
            assert_eq!(response.content.len(), 1, "{dialect:?}");
            assert_eq!(response.content[0], ContentBlock::text(mocked), "{dialect:?}");
            assert_eq!(response.model, CANONICAL_MODEL_ID);
        }
    }

    #[test]
    fn test_stream_order_preserved() {
        let tokens = ["one", " two", " three", " four"];
        let mut lines: Vec<String> = tokens
            .iter()
            .map(|t| format!(r#"data: {{"choices":[{{"delta":{{"content":"{t}"}}}}]}}"#))
            .collect();
        lines.push("data: [DONE]".to_string());

        let events: Vec<StreamEvent> = lines
            .iter()
            .flat_map(|line| stream_line_events(line, Dialect::OpenAi))
            .collect();

        assert_eq!(events.len(), tokens.len() + 1);
        for (event, token) in events.iter().zip(tokens) {
            assert_eq!(event.event, "content_block_delta");
            assert_eq!(event.data["delta"]["text"], token);
        }
        assert_eq!(events.last(), Some(&StreamEvent::message_stop()));
    }

    #[test]
    fn test_stream_chunk_bytes() {
        let bytes = from_provider_stream_chunk(
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
            Dialect::OpenAi,
        )
        .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("event: content_block_delta\ndata: {"));
        assert!(text.contains(r#""text_delta""#));

        assert!(from_provider_stream_chunk("", Dialect::Gemini).is_none());
        assert_eq!(
            from_provider_stream_chunk("event: ping", Dialect::Anthropic),
            Some(Bytes::from("event: ping\n"))
        );
    }

    #[test]
    fn test_terminator_detection() {
        assert!(is_stream_terminator("data: [DONE]", Dialect::OpenRouter));
        assert!(!is_stream_terminator("data: {}", Dialect::OpenAi));
        assert!(!is_stream_terminator("data: [DONE]", Dialect::Gemini));
    }
}
