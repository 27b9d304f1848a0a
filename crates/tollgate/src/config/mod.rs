use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use url::Url;

use crate::error::{Result, TollgateError};

/// Main configuration structure for Tollgate
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Inbound HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream provider configuration
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Request log storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Subagent routing configuration
    #[serde(default)]
    pub subagents: SubagentsConfig,
    /// Model-name routing rules
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Inbound HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:3001")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Largest accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

/// Upstream provider configuration.
///
/// Anthropic is always available. The other providers exist only when
/// their table is present in the config file (or their API key is set in
/// the environment).
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Upstream request timeout in seconds, applied to every provider client
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,
    #[serde(default)]
    pub gemini: Option<GeminiConfig>,
    #[serde(default)]
    pub openrouter: Option<OpenRouterConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            anthropic: AnthropicConfig::default(),
            openai: None,
            gemini: None,
            openrouter: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

/// Anthropic Messages API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    /// Value sent as the `anthropic-version` header
    #[serde(default = "default_anthropic_version")]
    pub version: String,
    /// Parsed for compatibility; the proxy makes a single attempt per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            version: default_anthropic_version(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_max_retries() -> u32 {
    3
}

/// OpenAI chat completions configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: String::new(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

/// Google Gemini configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Model used when the routed model is not a Gemini model name
    #[serde(default = "default_gemini_model")]
    pub default_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            api_key: String::new(),
            default_model: default_gemini_model(),
        }
    }
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-pro-latest".to_string()
}

/// OpenRouter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OpenRouterConfig {
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Sent as `HTTP-Referer` for OpenRouter attribution
    #[serde(default = "default_openrouter_referer")]
    pub referer: String,
    /// Sent as `X-Title` for the OpenRouter dashboard
    #[serde(default = "default_openrouter_title")]
    pub title: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: default_openrouter_base_url(),
            api_key: String::new(),
            referer: default_openrouter_referer(),
            title: default_openrouter_title(),
        }
    }
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api".to_string()
}

fn default_openrouter_referer() -> String {
    "https://github.com/tollgate-proxy/tollgate".to_string()
}

fn default_openrouter_title() -> String {
    "Tollgate".to_string()
}

/// Request log storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("requests.db")
}

/// Subagent routing configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SubagentsConfig {
    /// Route recognised subagent prompts to their mapped model
    #[serde(default)]
    pub enable: bool,
    /// Agent name -> target model
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

/// Model-name to provider routing
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Provider used when no prefix rule matches
    #[serde(default = "default_fallback_provider")]
    pub fallback_provider: Option<String>,
    /// Ordered prefix rules, first match wins
    #[serde(default = "default_rules")]
    pub rules: Vec<PrefixRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback_provider: default_fallback_provider(),
            rules: default_rules(),
        }
    }
}

/// A single `prefix -> provider` routing rule
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PrefixRule {
    pub prefix: String,
    pub provider: String,
}

impl PrefixRule {
    pub fn new(prefix: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            provider: provider.into(),
        }
    }
}

fn default_fallback_provider() -> Option<String> {
    Some("anthropic".to_string())
}

fn default_rules() -> Vec<PrefixRule> {
    vec![
        PrefixRule::new("gpt-", "openai"),
        PrefixRule::new("o1", "openai"),
        PrefixRule::new("o3", "openai"),
        PrefixRule::new("claude-", "anthropic"),
        PrefixRule::new("gemini-", "gemini"),
    ]
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TollgateError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env_overrides(|key| std::env::var(key).ok());
        self
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Setting a provider's API key creates that provider's table if the
    /// config file did not define one.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(port) = var("PORT") {
            let host = self
                .server
                .listen_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.server.listen_addr = format!("{host}:{port}");
        }

        if let Some(url) = var("ANTHROPIC_FORWARD_URL") {
            self.providers.anthropic.base_url = url;
        }
        if let Some(version) = var("ANTHROPIC_VERSION") {
            self.providers.anthropic.version = version;
        }
        if let Some(retries) = var("ANTHROPIC_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.providers.anthropic.max_retries = retries;
        }

        if let Some(key) = var("OPENAI_API_KEY") {
            self.providers.openai.get_or_insert_with(Default::default).api_key = key;
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.providers.openai.get_or_insert_with(Default::default).base_url = url;
        }
        if let Some(key) = var("GEMINI_API_KEY") {
            self.providers.gemini.get_or_insert_with(Default::default).api_key = key;
        }
        if let Some(key) = var("OPENROUTER_API_KEY") {
            self.providers.openrouter.get_or_insert_with(Default::default).api_key = key;
        }

        if let Some(path) = var("DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
    }

    /// Check that every configured base URL is absolute
    pub fn validate(&self) -> Result<()> {
        let mut urls = vec![("anthropic", &self.providers.anthropic.base_url)];
        if let Some(openai) = &self.providers.openai {
            urls.push(("openai", &openai.base_url));
        }
        if let Some(gemini) = &self.providers.gemini {
            urls.push(("gemini", &gemini.base_url));
        }
        if let Some(openrouter) = &self.providers.openrouter {
            urls.push(("openrouter", &openrouter.base_url));
        }

        for (name, raw) in urls {
            let url = Url::parse(raw).map_err(|e| {
                TollgateError::Config(format!("Invalid {name} base URL '{raw}': {e}"))
            })?;
            if url.host_str().is_none() {
                return Err(TollgateError::Config(format!(
                    "Invalid {name} base URL '{raw}': scheme and host are required"
                )));
            }
        }

        if self.subagents.enable && self.subagents.mappings.is_empty() {
            tracing::warn!("Subagent routing is enabled but no mappings are configured");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:3001");
        assert_eq!(config.providers.timeout_secs, 300);
        assert_eq!(config.providers.anthropic.base_url, "https://api.anthropic.com");
        assert_eq!(config.providers.anthropic.version, "2023-06-01");
        assert!(config.providers.openai.is_none());
        assert!(!config.subagents.enable);
        assert_eq!(config.routing.fallback_provider.as_deref(), Some("anthropic"));
        assert_eq!(config.routing.rules[0], PrefixRule::new("gpt-", "openai"));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.storage.db_path, PathBuf::from("requests.db"));
        assert_eq!(config.routing.rules.len(), 5);
    }

    #[test]
    fn test_parse_full_document() {
        let config = Config::from_toml_str(
            r#"
            [server]
            listen_addr = "0.0.0.0:8080"

            [providers]
            timeout_secs = 60

            [providers.openai]
            api_key = "sk-test"

            [subagents]
            enable = true

            [subagents.mappings]
            code-reviewer = "gpt-4o"

            [routing]
            fallback_provider = "openai"
            rules = [{ prefix = "claude-", provider = "anthropic" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.providers.timeout_secs, 60);
        let openai = config.providers.openai.unwrap();
        assert_eq!(openai.api_key, "sk-test");
        assert_eq!(openai.base_url, "https://api.openai.com");
        assert!(config.subagents.enable);
        assert_eq!(config.subagents.mappings["code-reviewer"], "gpt-4o");
        assert_eq!(config.routing.rules.len(), 1);
        assert_eq!(config.routing.fallback_provider.as_deref(), Some("openai"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("[server\nlisten_addr = 1").unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PORT", "4000"),
            ("ANTHROPIC_FORWARD_URL", "http://localhost:9000"),
            ("OPENAI_API_KEY", "sk-env"),
            ("DB_PATH", "/tmp/tollgate.db"),
            ("GEMINI_API_KEY", ""),
        ]);

        let mut config = Config::default();
        config.apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.providers.anthropic.base_url, "http://localhost:9000");
        assert_eq!(config.providers.openai.unwrap().api_key, "sk-env");
        assert!(config.providers.gemini.is_none());
        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/tollgate.db"));
    }

    #[test]
    fn test_validate_rejects_relative_url() {
        let mut config = Config::default();
        config.providers.anthropic.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.providers.anthropic.base_url = "http://localhost:8080".to_string();
        assert!(config.validate().is_ok());
    }
}
