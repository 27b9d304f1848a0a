use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};
use std::time::Duration;

use super::{
    ANTHROPIC, ClientAuth, ForwardPolicy, ProviderClient, ProviderResponse, UpstreamCall,
    endpoint, execute, forward_headers,
};
use crate::config::AnthropicConfig;
use crate::error::{Result, TollgateError};
use crate::translate::{CanonicalRequest, Dialect, to_provider_request};

/// Anthropic Messages API; the canonical dialect, so bodies pass through
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, config: &AnthropicConfig, timeout: Duration) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            version: config.version.clone(),
            timeout,
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn name(&self) -> &str {
        ANTHROPIC
    }

    async fn forward(
        &self,
        request: &CanonicalRequest,
        auth: &ClientAuth,
        headers: &HeaderMap,
    ) -> Result<ProviderResponse> {
        let body = serde_json::to_vec(&to_provider_request(request, Dialect::Anthropic)?)?;

        let mut upstream_headers = forward_headers(headers, ForwardPolicy::Passthrough);
        upstream_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream_headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.version)
                .map_err(|e| TollgateError::Config(format!("Invalid anthropic version: {e}")))?,
        );
        if let Some(api_key) = &auth.api_key {
            upstream_headers.insert("x-api-key", api_key.clone());
        }

        execute(
            &self.http,
            UpstreamCall {
                provider: ANTHROPIC,
                dialect: Dialect::Anthropic,
                url: endpoint(&self.base_url, "/v1/messages")?,
                headers: upstream_headers,
                body,
                streaming: request.stream,
                timeout: self.timeout,
            },
        )
        .await
    }
}
