//! Upstream provider clients
//!
//! Each provider owns its endpoint shape and authentication, invokes the
//! wire translator, and hands back a uniform buffered-or-streaming response.
//! The request pipeline looks clients up by name in a [`ProviderRegistry`].

mod anthropic;
mod gemini;
mod headers;
mod openai;
mod openrouter;
mod stream;

pub use anthropic::AnthropicClient;
pub use gemini::{GeminiClient, gemini_model};
pub use headers::{EXCLUDED_HEADERS, ForwardPolicy, forward_headers, response_headers};
pub use openai::OpenAiClient;
pub use openrouter::OpenRouterClient;
pub use stream::STREAM_CHANNEL_CAPACITY;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::config::ProvidersConfig;
use crate::encoding;
use crate::error::{Result, TollgateError};
use crate::translate::{CanonicalRequest, Dialect, from_provider_response};

pub const ANTHROPIC: &str = "anthropic";
pub const OPENAI: &str = "openai";
pub const GEMINI: &str = "gemini";
pub const OPENROUTER: &str = "openrouter";

/// Credentials the client presented, forwarded opaquely
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientAuth {
    pub api_key: Option<HeaderValue>,
    pub authorization: Option<HeaderValue>,
}

impl ClientAuth {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let non_empty = |name: &str| headers.get(name).filter(|v| !v.is_empty()).cloned();
        Self {
            api_key: non_empty("x-api-key"),
            authorization: non_empty(header::AUTHORIZATION.as_str()),
        }
    }

    pub fn is_present(&self) -> bool {
        self.api_key.is_some() || self.authorization.is_some()
    }
}

/// Body of a provider response
#[derive(Debug)]
pub enum ProviderBody {
    Buffered(Bytes),
    /// Canonical SSE bytes produced by the stream worker
    Streaming(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct ProviderResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ProviderBody,
}

impl ProviderResponse {
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ProviderBody::Streaming(_))
    }
}

/// One upstream LLM provider
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Identifier used in routing rules and records
    fn name(&self) -> &str;

    /// Send the request upstream.
    ///
    /// Non-2xx statuses are not errors: their raw body and headers come back
    /// untranslated. `Err` means the upstream could not be reached.
    async fn forward(
        &self,
        request: &CanonicalRequest,
        auth: &ClientAuth,
        headers: &HeaderMap,
    ) -> Result<ProviderResponse>;
}

/// Provider name -> client
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: BTreeMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build clients for every configured provider.
    ///
    /// Anthropic is always present; the others only when configured.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let http = http_client()?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut registry = Self::new();

        registry.insert(Arc::new(AnthropicClient::new(
            http.clone(),
            &config.anthropic,
            timeout,
        )));
        if let Some(openai) = &config.openai {
            registry.insert(Arc::new(OpenAiClient::new(http.clone(), openai, timeout)));
        }
        if let Some(gemini) = &config.gemini {
            registry.insert(Arc::new(GeminiClient::new(http.clone(), gemini, timeout)));
        }
        if let Some(openrouter) = &config.openrouter {
            registry.insert(Arc::new(OpenRouterClient::new(http, openrouter, timeout)));
        }

        tracing::info!(providers = ?registry.names(), "Provider clients ready");
        Ok(registry)
    }

    pub fn insert(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| TollgateError::Upstream(format!("Failed to create HTTP client: {e}")))
}

/// A fully prepared upstream call
pub(crate) struct UpstreamCall<'a> {
    pub provider: &'a str,
    pub dialect: Dialect,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub streaming: bool,
    pub timeout: Duration,
}

/// URL safe to log: no query string, which may carry a key
fn display_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Send the call and shape the upstream response.
///
/// Buffered calls are bounded by the timeout end to end. Streaming calls are
/// bounded until the response headers arrive, after which the stream runs
/// as long as the upstream keeps it open.
pub(crate) async fn execute(http: &reqwest::Client, call: UpstreamCall<'_>) -> Result<ProviderResponse> {
    let shown = display_url(&call.url);
    tracing::debug!(provider = call.provider, url = %shown, stream = call.streaming, "Forwarding upstream");

    let mut builder = http.post(call.url).headers(call.headers).body(call.body);
    if !call.streaming {
        builder = builder.timeout(call.timeout);
    }

    let response = match tokio::time::timeout(call.timeout, builder.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let cause = if e.is_timeout() {
                "request timed out"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            return Err(TollgateError::Upstream(format!("POST {shown}: {cause}: {e}")));
        }
        Err(_) => {
            return Err(TollgateError::Upstream(format!(
                "POST {shown}: no response within {}s",
                call.timeout.as_secs()
            )));
        }
    };

    let status = response.status();
    let upstream_headers = response.headers().clone();
    let mut headers = response_headers(&upstream_headers);

    if !status.is_success() {
        let body = response
            .bytes()
            .await
            .map_err(|e| TollgateError::Upstream(format!("POST {shown}: reading error body: {e}")))?;
        tracing::debug!(provider = call.provider, %status, "Upstream returned an error status");
        return Ok(ProviderResponse {
            status,
            headers,
            body: ProviderBody::Buffered(body),
        });
    }

    if call.streaming {
        if !call.dialect.is_canonical() {
            headers.remove(header::CONTENT_ENCODING);
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        }
        let receiver = stream::spawn_stream_worker(response, call.dialect, call.provider.to_string());
        return Ok(ProviderResponse {
            status,
            headers,
            body: ProviderBody::Streaming(receiver),
        });
    }

    let raw = response
        .bytes()
        .await
        .map_err(|e| TollgateError::Upstream(format!("POST {shown}: reading body: {e}")))?;

    if call.dialect.is_canonical() {
        return Ok(ProviderResponse {
            status,
            headers,
            body: ProviderBody::Buffered(raw),
        });
    }

    let plain = encoding::decode_body(&upstream_headers, &raw)?;
    let translated = from_provider_response(&plain, call.dialect).map_err(|e| {
        TollgateError::Translation(format!("{} response could not be translated: {e}", call.provider))
    })?;
    let body = Bytes::from(serde_json::to_vec(&translated)?);

    headers.remove(header::CONTENT_ENCODING);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    Ok(ProviderResponse {
        status,
        headers,
        body: ProviderBody::Buffered(body),
    })
}

/// Join a base URL and a path, tolerating a trailing slash on the base
pub(crate) fn endpoint(base_url: &str, path: &str) -> Result<Url> {
    let joined = format!("{}{}", base_url.trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| TollgateError::Config(format!("Invalid upstream URL '{joined}': {e}")))
}

pub(crate) fn bearer(api_key: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| TollgateError::Config(format!("API key is not a valid header value: {e}")))
}
