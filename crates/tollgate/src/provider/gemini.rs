use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};
use std::time::Duration;

use super::{
    ClientAuth, ForwardPolicy, GEMINI, ProviderClient, ProviderResponse, UpstreamCall, endpoint,
    execute, forward_headers,
};
use crate::config::GeminiConfig;
use crate::error::Result;
use crate::translate::{CanonicalRequest, Dialect, to_provider_request};

/// Google Gemini; the API key travels as a query parameter
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: &GeminiConfig, timeout: Duration) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
            timeout,
        }
    }
}

/// Gemini model for a routed model name.
///
/// Gemini names pass through; Claude tiers map to the nearest Gemini tier;
/// anything else uses the configured default.
pub fn gemini_model(target: &str, default_model: &str) -> String {
    if target.starts_with("gemini-") {
        return target.to_string();
    }
    if target.contains("opus") || target.contains("sonnet") {
        return "gemini-1.5-pro-latest".to_string();
    }
    if target.contains("haiku") {
        return "gemini-1.5-flash-latest".to_string();
    }
    default_model.to_string()
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn name(&self) -> &str {
        GEMINI
    }

    async fn forward(
        &self,
        request: &CanonicalRequest,
        _auth: &ClientAuth,
        headers: &HeaderMap,
    ) -> Result<ProviderResponse> {
        let body = serde_json::to_vec(&to_provider_request(request, Dialect::Gemini)?)?;

        let model = gemini_model(&request.model, &self.default_model);
        let mut url = endpoint(
            &self.base_url,
            &format!("/v1beta/models/{model}:streamGenerateContent"),
        )?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", &self.api_key);
            if request.stream {
                query.append_pair("alt", "sse");
            }
        }

        let mut upstream_headers = forward_headers(headers, ForwardPolicy::Translating);
        upstream_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        execute(
            &self.http,
            UpstreamCall {
                provider: GEMINI,
                dialect: Dialect::Gemini,
                url,
                headers: upstream_headers,
                body,
                streaming: request.stream,
                timeout: self.timeout,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_model_mapping() {
        assert_eq!(gemini_model("gemini-2.0-flash", "d"), "gemini-2.0-flash");
        assert_eq!(gemini_model("claude-3-opus-20240229", "d"), "gemini-1.5-pro-latest");
        assert_eq!(gemini_model("claude-3-5-haiku-20241022", "d"), "gemini-1.5-flash-latest");
        assert_eq!(gemini_model("gpt-4o", "gemini-default"), "gemini-default");
    }
}
