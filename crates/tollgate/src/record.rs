//! Request and response records persisted for every proxied call

use axum::http::{HeaderMap, StatusCode, header};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::router::RoutingDecision;
use crate::translate::CanonicalRequest;

/// Header name fragments whose values are never stored
const SENSITIVE_HEADER_FRAGMENTS: &[&str] = &[
    "x-api-key",
    "api-key",
    "authorization",
    "anthropic-api-key",
    "openai-api-key",
    "bearer",
];

const REDACTED: &str = "[REDACTED]";

/// Header name -> values, secrets redacted
pub type SanitizedHeaders = BTreeMap<String, Vec<String>>;

pub fn sanitize_headers(headers: &HeaderMap) -> SanitizedHeaders {
    let mut sanitized = SanitizedHeaders::new();
    for name in headers.keys() {
        let key = name.as_str();
        let values = if SENSITIVE_HEADER_FRAGMENTS.iter().any(|s| key.contains(s)) {
            vec![REDACTED.to_string()]
        } else {
            headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect()
        };
        sanitized.insert(key.to_string(), values);
    }
    sanitized
}

/// Random 16-character hex request id
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// One proxied request, plus its response once fully observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub endpoint: String,
    pub headers: SanitizedHeaders,
    pub body: CanonicalRequest,
    pub model: String,
    #[serde(default)]
    pub original_model: Option<String>,
    #[serde(default)]
    pub routed_model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub response: Option<ResponseRecord>,
}

impl RequestRecord {
    pub fn new(method: &str, endpoint: &str, headers: &HeaderMap, body: CanonicalRequest) -> Self {
        Self {
            request_id: new_request_id(),
            timestamp: Utc::now(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            headers: sanitize_headers(headers),
            model: body.model.clone(),
            body,
            original_model: None,
            routed_model: None,
            provider: None,
            user_agent: header_string(headers, header::USER_AGENT),
            content_type: header_string(headers, header::CONTENT_TYPE),
            response: None,
        }
    }

    /// Record where the request was sent
    pub fn apply_route(&mut self, decision: &RoutingDecision) {
        self.original_model = Some(decision.original_model.clone());
        self.routed_model = Some(decision.target_model.clone());
        self.provider = Some(decision.provider.clone());
    }

    /// Attach the response. Fails if one is already attached.
    pub fn attach_response(&mut self, response: ResponseRecord) -> Result<()> {
        if self.response.is_some() {
            return Err(TollgateError::General(format!(
                "response already attached to request {}",
                self.request_id
            )));
        }
        self.response = Some(response);
        Ok(())
    }
}

/// What came back from the upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status_code: u16,
    pub headers: SanitizedHeaders,
    /// Parsed body when it was JSON
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub body_text: Option<String>,
    pub response_time_ms: u64,
    pub is_streaming: bool,
    #[serde(default)]
    pub streaming_chunks: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl ResponseRecord {
    /// Record for a buffered body, which must already be decompressed
    pub fn buffered(status: StatusCode, headers: &HeaderMap, body: &[u8], elapsed: Duration) -> Self {
        Self {
            status_code: status.as_u16(),
            headers: sanitize_headers(headers),
            body: serde_json::from_slice(body).ok(),
            body_text: Some(String::from_utf8_lossy(body).into_owned()),
            response_time_ms: elapsed.as_millis() as u64,
            is_streaming: false,
            streaming_chunks: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Record for a stream, built from the assembled message and raw lines
    pub fn streamed(
        status: StatusCode,
        headers: &HeaderMap,
        body: Value,
        chunks: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            status_code: status.as_u16(),
            headers: sanitize_headers(headers),
            body: Some(body),
            body_text: None,
            response_time_ms: elapsed.as_millis() as u64,
            is_streaming: true,
            streaming_chunks: chunks,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request() -> CanonicalRequest {
        serde_json::from_value(serde_json::json!({
            "model": "claude-3-opus-20240229",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_sanitize_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-ant-secret"));
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("x-openai-api-key", HeaderValue::from_static("sk-secret"));
        headers.insert("user-agent", HeaderValue::from_static("claude-cli/1.0"));

        let sanitized = sanitize_headers(&headers);
        assert_eq!(sanitized["x-api-key"], vec!["[REDACTED]"]);
        assert_eq!(sanitized["authorization"], vec!["[REDACTED]"]);
        assert_eq!(sanitized["x-openai-api-key"], vec!["[REDACTED]"]);
        assert_eq!(sanitized["user-agent"], vec!["claude-cli/1.0"]);
    }

    #[test]
    fn test_request_id_shape() {
        let id = new_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_request_id());
    }

    #[test]
    fn test_new_record_captures_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("claude-cli/1.0"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let record = RequestRecord::new("POST", "/v1/messages", &headers, request());
        assert_eq!(record.model, "claude-3-opus-20240229");
        assert_eq!(record.user_agent.as_deref(), Some("claude-cli/1.0"));
        assert_eq!(record.content_type.as_deref(), Some("application/json"));
        assert!(record.response.is_none());
    }

    #[test]
    fn test_response_attached_once() {
        let mut record = RequestRecord::new("POST", "/v1/messages", &HeaderMap::new(), request());
        let response = ResponseRecord::buffered(
            StatusCode::OK,
            &HeaderMap::new(),
            br#"{"ok":true}"#,
            Duration::from_millis(12),
        );

        record.attach_response(response.clone()).unwrap();
        assert!(record.attach_response(response).is_err());
        let attached = record.response.unwrap();
        assert_eq!(attached.body, Some(serde_json::json!({"ok": true})));
        assert_eq!(attached.response_time_ms, 12);
    }

    #[test]
    fn test_non_json_body_kept_as_text() {
        let response =
            ResponseRecord::buffered(StatusCode::BAD_GATEWAY, &HeaderMap::new(), b"upstream down", Duration::ZERO);
        assert!(response.body.is_none());
        assert_eq!(response.body_text.as_deref(), Some("upstream down"));
        assert_eq!(response.status_code, 502);
    }
}
