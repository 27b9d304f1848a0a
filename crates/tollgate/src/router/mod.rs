//! Agent router: decides provider and model for each request
//!
//! Subagent requests are recognised by fingerprinting the static part of
//! their system prompt. Everything else is routed by model-name prefix.
//! The router is an immutable value; build it once and share it behind an
//! `Arc`.

mod agents;

pub use agents::{AgentDefinition, AgentTable, agent_path, parse_agent_file};

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::{Config, PrefixRule, RoutingConfig};
use crate::error::{Result, TollgateError};
use crate::translate::CanonicalRequest;

/// Text identifying the assistant's own base system prompt
pub const BASE_AGENT_MARKER: &str = "You are Claude Code";

/// Hex characters of the SHA-256 digest used as the fingerprint
const FINGERPRINT_LEN: usize = 16;

/// Prompt text before the variable `Notes:` section, trimmed.
///
/// A blank line before `Notes:` matches too; the extra newline is trimmed.
pub fn static_prompt(text: &str) -> &str {
    let end = text.find("\nNotes:").unwrap_or(text.len());
    text[..end].trim()
}

/// Content fingerprint of a system prompt
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(static_prompt(text).as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..FINGERPRINT_LEN].to_string()
}

/// Ordered model-prefix rules with an optional fallback provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRules {
    rules: Vec<PrefixRule>,
    fallback: Option<String>,
}

impl ProviderRules {
    pub fn new(rules: Vec<PrefixRule>, fallback: Option<String>) -> Self {
        Self { rules, fallback }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(config.rules.clone(), config.fallback_provider.clone())
    }

    /// Provider for a model name: first matching prefix, else the fallback
    pub fn resolve(&self, model: &str) -> Option<String> {
        self.rules
            .iter()
            .find(|rule| model.starts_with(&rule.prefix))
            .map(|rule| rule.provider.clone())
            .or_else(|| self.fallback.clone())
    }
}

impl Default for ProviderRules {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub provider: String,
    pub original_model: String,
    pub target_model: String,
    /// Matched subagent, if any
    pub agent: Option<String>,
}

impl RoutingDecision {
    pub fn is_rerouted(&self) -> bool {
        self.original_model != self.target_model
    }
}

pub struct AgentRouter {
    subagents_enabled: bool,
    agents: AgentTable,
    rules: ProviderRules,
    available: BTreeSet<String>,
}

impl AgentRouter {
    /// `available` lists the providers that have a configured client
    pub fn new(
        subagents_enabled: bool,
        agents: AgentTable,
        rules: ProviderRules,
        available: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            subagents_enabled,
            agents,
            rules,
            available: available.into_iter().collect(),
        }
    }

    /// Build from configuration, loading agent files from the working
    /// directory first and the home directory second
    pub fn from_config(config: &Config, available: impl IntoIterator<Item = String>) -> Self {
        let rules = ProviderRules::from_config(&config.routing);

        let agents = if config.subagents.enable {
            let roots = default_search_roots();
            AgentTable::load(&config.subagents.mappings, &roots, &rules)
        } else {
            tracing::info!("Subagent routing disabled");
            AgentTable::new()
        };

        Self::new(config.subagents.enable, agents, rules, available)
    }

    pub fn agents(&self) -> &AgentTable {
        &self.agents
    }

    /// Decide provider and model for a request.
    ///
    /// Pure over the router's state: identical requests get identical
    /// decisions.
    pub fn determine_route(&self, request: &CanonicalRequest) -> Result<RoutingDecision> {
        let original_model = request.model.clone();

        if self.subagents_enabled {
            if let Some(agent) = self.match_agent(request) {
                tracing::debug!(
                    agent = %agent.name,
                    original_model = %original_model,
                    target_model = %agent.target_model,
                    "Subagent prompt matched"
                );
                return self.checked(RoutingDecision {
                    provider: agent.target_provider.clone(),
                    original_model,
                    target_model: agent.target_model.clone(),
                    agent: Some(agent.name.clone()),
                });
            }
        }

        let provider = self.rules.resolve(&original_model).ok_or_else(|| {
            TollgateError::Routing(format!(
                "no provider rule matches model '{original_model}' and no fallback is configured"
            ))
        })?;

        self.checked(RoutingDecision {
            provider,
            target_model: original_model.clone(),
            original_model,
            agent: None,
        })
    }

    fn match_agent(&self, request: &CanonicalRequest) -> Option<&AgentDefinition> {
        let texts = request.system.texts();
        if texts.len() != 2 || !texts[0].contains(BASE_AGENT_MARKER) {
            return None;
        }
        self.agents.get(&fingerprint(texts[1]))
    }

    fn checked(&self, decision: RoutingDecision) -> Result<RoutingDecision> {
        if self.available.contains(&decision.provider) {
            return Ok(decision);
        }
        Err(TollgateError::Routing(format!(
            "provider '{}' for model '{}'{} is not configured",
            decision.provider,
            decision.target_model,
            decision
                .agent
                .as_ref()
                .map(|a| format!(" (agent '{a}')"))
                .unwrap_or_default()
        )))
    }
}

fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Some(home) = dirs::home_dir() {
        roots.push(home);
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_prompt_truncation() {
        assert_eq!(static_prompt("  Review code.\nNotes: today"), "Review code.");
        assert_eq!(static_prompt("Review code.\n\nNotes:\n- a"), "Review code.");
        assert_eq!(static_prompt("No notes here  \n"), "No notes here");
        assert_eq!(static_prompt("Inline Notes: stay"), "Inline Notes: stay");
        assert_eq!(
            static_prompt("Review code.\n\nNotes: a\nNotes: b"),
            static_prompt("Review code.\nNotes: a")
        );
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint("hello");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        // sha256("hello")
        assert_eq!(fp, "2cf24dba5fb0a30e");
    }

    #[test]
    fn test_rules_first_match_wins() {
        let rules = ProviderRules::new(
            vec![PrefixRule::new("o1", "openai"), PrefixRule::new("o1-mini", "openrouter")],
            None,
        );
        assert_eq!(rules.resolve("o1-mini").as_deref(), Some("openai"));
        assert_eq!(rules.resolve("claude-3"), None);
    }

    #[test]
    fn test_unconfigured_provider_is_an_error() {
        let router = AgentRouter::new(false, AgentTable::new(), ProviderRules::default(), vec!["anthropic".to_string()]);
        let request: CanonicalRequest =
            serde_json::from_value(serde_json::json!({"model": "gpt-4o", "messages": []})).unwrap();

        let err = router.determine_route(&request).unwrap_err();
        assert!(matches!(err, TollgateError::Routing(_)));
        assert!(err.to_string().contains("openai"));
    }
}
