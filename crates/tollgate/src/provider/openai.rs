use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};
use std::time::Duration;

use super::{
    ClientAuth, ForwardPolicy, OPENAI, ProviderClient, ProviderResponse, UpstreamCall, bearer,
    endpoint, execute, forward_headers,
};
use crate::config::OpenAiConfig;
use crate::error::Result;
use crate::translate::{CanonicalRequest, Dialect, to_provider_request};

/// OpenAI chat completions
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, config: &OpenAiConfig, timeout: Duration) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn name(&self) -> &str {
        OPENAI
    }

    async fn forward(
        &self,
        request: &CanonicalRequest,
        _auth: &ClientAuth,
        headers: &HeaderMap,
    ) -> Result<ProviderResponse> {
        let body = serde_json::to_vec(&to_provider_request(request, Dialect::OpenAi)?)?;

        let mut upstream_headers = forward_headers(headers, ForwardPolicy::Translating);
        upstream_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream_headers.insert(header::AUTHORIZATION, bearer(&self.api_key)?);

        execute(
            &self.http,
            UpstreamCall {
                provider: OPENAI,
                dialect: Dialect::OpenAi,
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
