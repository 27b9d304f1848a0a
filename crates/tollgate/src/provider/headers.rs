//! Header forwarding policy

use axum::http::{HeaderMap, header};

/// Headers never copied from the client to an upstream, or back
pub const EXCLUDED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "proxy-connection",
    "proxy-authorization",
    "keep-alive",
    "content-length",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Body framing headers. Every client re-serializes the body as plain JSON
/// and sets its own content type.
const BODY_HEADERS: &[&str] = &["content-encoding", "content-type"];

/// Client headers that only make sense to Anthropic
const CANONICAL_CREDENTIAL_HEADERS: &[&str] = &["x-api-key", "authorization"];

/// Which client headers reach the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardPolicy {
    /// Everything except the exclusion set
    Passthrough,
    /// Also drop Anthropic credentials, `anthropic-*` headers and
    /// `accept-encoding`, for providers whose bodies get translated
    Translating,
}

fn is_excluded(name: &str) -> bool {
    EXCLUDED_HEADERS.contains(&name)
}

fn is_canonical_only(name: &str) -> bool {
    CANONICAL_CREDENTIAL_HEADERS.contains(&name)
        || name.starts_with("anthropic-")
        || name == header::ACCEPT_ENCODING.as_str()
}

/// Copy the client's headers for an upstream request.
///
/// Callers insert provider-mandated headers afterwards so those win over
/// anything the client sent.
pub fn forward_headers(inbound: &HeaderMap, policy: ForwardPolicy) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for (name, value) in inbound {
        let name_str = name.as_str();
        if is_excluded(name_str) || BODY_HEADERS.contains(&name_str) {
            continue;
        }
        if policy == ForwardPolicy::Translating && is_canonical_only(name_str) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// Copy upstream response headers for the client
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if !is_excluded(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}
