use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};
use std::time::Duration;

use super::{
    ClientAuth, ForwardPolicy, OPENROUTER, ProviderClient, ProviderResponse, UpstreamCall,
    bearer, endpoint, execute, forward_headers,
};
use crate::config::OpenRouterConfig;
use crate::error::{Result, TollgateError};
use crate::translate::{CanonicalRequest, Dialect, to_provider_request};

/// OpenRouter aggregator: OpenAI grammar plus attribution headers
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    referer: String,
    title: String,
    timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(http: reqwest::Client, config: &OpenRouterConfig, timeout: Duration) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            referer: config.referer.clone(),
            title: config.title.clone(),
            timeout,
        }
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TollgateError::Config(format!("Invalid {name} header value: {e}")))
}

#[async_trait]
impl ProviderClient for OpenRouterClient {
    fn name(&self) -> &str {
        OPENROUTER
    }

    async fn forward(
        &self,
        request: &CanonicalRequest,
        _auth: &ClientAuth,
        headers: &HeaderMap,
    ) -> Result<ProviderResponse> {
        let body = serde_json::to_vec(&to_provider_request(request, Dialect::OpenRouter)?)?;

        let mut upstream_headers = forward_headers(headers, ForwardPolicy::Translating);
        upstream_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream_headers.insert(header::AUTHORIZATION, bearer(&self.api_key)?);
        upstream_headers.insert("http-referer", header_value("HTTP-Referer", &self.referer)?);
        upstream_headers.insert("x-title", header_value("X-Title", &self.title)?);

        execute(
            &self.http,
            UpstreamCall {
                provider: OPENROUTER,
                dialect: Dialect::OpenRouter,
                url: endpoint(&self.base_url, "/v1/chat/completions")?,
                headers: upstream_headers,
                body,
                streaming: request.stream,
                timeout: self.timeout,
            },
        )
        .await
    }
}
