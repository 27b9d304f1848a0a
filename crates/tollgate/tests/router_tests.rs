//! Integration tests for the agent router
//!
//! Fingerprint stability, prefix resolution, default routing and subagent
//! matching against agent files on disk.

use std::collections::BTreeMap;

use tollgate::config::{Config, PrefixRule};
use tollgate::router::{AgentRouter, AgentTable, ProviderRules, fingerprint, static_prompt};
use tollgate::testing::{
    BASE_SYSTEM_PROMPT, REVIEWER_PROMPT, canonical_request, subagent_request, write_agent_file,
};
use tollgate::translate::{SystemBlock, SystemPrompt};

// =============================================================================
// Test Fixtures
// =============================================================================

fn providers(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn reviewer_mapping() -> BTreeMap<String, String> {
    BTreeMap::from([("code-reviewer".to_string(), "gpt-4o".to_string())])
}

/// Router with `code-reviewer -> gpt-4o` loaded from a temporary project
fn subagent_router(dir: &tempfile::TempDir) -> AgentRouter {
    write_agent_file(dir.path(), "code-reviewer", REVIEWER_PROMPT).unwrap();
    let rules = ProviderRules::default();
    let table = AgentTable::load(&reviewer_mapping(), &[dir.path().to_path_buf()], &rules);
    AgentRouter::new(true, table, rules, providers(&["anthropic", "openai"]))
}

// =============================================================================
// Fingerprint Tests
// =============================================================================

mod fingerprint_tests {
    use super::*;

    #[test]
    fn test_notes_suffix_does_not_change_fingerprint() {
        let texts = [
            "You review code.",
            "Multi\nline\nprompt with detail.",
            "  padded prompt  ",
        ];
        let suffixes = ["\nNotes: today is Monday", "\n\nNotes:\n- cwd: /tmp\n- branch: main"];

        for text in texts {
            for suffix in suffixes {
                assert_eq!(
                    fingerprint(&format!("{text}{suffix}")),
                    fingerprint(text),
                    "suffix {suffix:?} changed fingerprint of {text:?}"
                );
            }
        }
    }

    #[test]
    fn test_unmarked_text_hashes_trimmed() {
        assert_eq!(fingerprint("  hello \n"), fingerprint("hello"));
        assert_eq!(static_prompt("  hello \n"), "hello");
        assert_ne!(fingerprint("hello"), fingerprint("hello world"));
    }
}

// =============================================================================
// Provider Rule Tests
// =============================================================================

mod rule_tests {
    use super::*;

    #[test]
    fn test_prefix_resolution_order_and_fallback() {
        let rules = ProviderRules::new(
            vec![PrefixRule::new("gpt-", "openai"), PrefixRule::new("claude-", "anthropic")],
            Some("anthropic".to_string()),
        );
        assert_eq!(rules.resolve("gpt-4o").as_deref(), Some("openai"));
        assert_eq!(rules.resolve("claude-3-opus").as_deref(), Some("anthropic"));
        assert_eq!(rules.resolve("mistral-large").as_deref(), Some("anthropic"));

        let strict = ProviderRules::new(vec![PrefixRule::new("gpt-", "openai")], None);
        assert_eq!(strict.resolve("mistral-large"), None);
    }

    #[test]
    fn test_default_rules_cover_known_families() {
        let rules = ProviderRules::default();
        assert_eq!(rules.resolve("o1-preview").as_deref(), Some("openai"));
        assert_eq!(rules.resolve("gemini-1.5-pro").as_deref(), Some("gemini"));
        assert_eq!(rules.resolve("claude-3-5-sonnet-20241022").as_deref(), Some("anthropic"));
    }
}

// =============================================================================
// Routing Scenario Tests
// =============================================================================

mod routing_tests {
    use super::*;

    #[test]
    fn test_default_routing_keeps_model() {
        let config = Config::default();
        let router = AgentRouter::from_config(&config, providers(&["anthropic"]));

        let decision = router
            .determine_route(&canonical_request("claude-3-opus-20240229", "hi"))
            .unwrap();
        assert_eq!(decision.provider, "anthropic");
        assert_eq!(decision.target_model, "claude-3-opus-20240229");
        assert_eq!(decision.original_model, "claude-3-opus-20240229");
        assert!(decision.agent.is_none());
        assert!(!decision.is_rerouted());
    }

    #[test]
    fn test_subagent_prompt_routes_to_mapped_model() {
        let dir = tempfile::tempdir().unwrap();
        let router = subagent_router(&dir);
        assert_eq!(router.agents().len(), 1);

        let request = subagent_request("claude-3-opus-20240229", REVIEWER_PROMPT, "- cwd: /repo");
        let decision = router.determine_route(&request).unwrap();

        assert_eq!(decision.provider, "openai");
        assert_eq!(decision.target_model, "gpt-4o");
        assert_eq!(decision.original_model, "claude-3-opus-20240229");
        assert_eq!(decision.agent.as_deref(), Some("code-reviewer"));
        assert!(decision.is_rerouted());
    }

    #[test]
    fn test_routing_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let router = subagent_router(&dir);

        let request = subagent_request("claude-3-opus-20240229", REVIEWER_PROMPT, "- x");
        let first = router.determine_route(&request).unwrap();
        let second = router.determine_route(&request.clone()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_subagent_match_requires_base_prompt_first() {
        let dir = tempfile::tempdir().unwrap();
        let router = subagent_router(&dir);

        let mut request = subagent_request("claude-3-opus-20240229", REVIEWER_PROMPT, "- x");
        request.system = SystemPrompt::Blocks(vec![
            SystemBlock::text("You are some other tool."),
            SystemBlock::text(REVIEWER_PROMPT),
        ]);
        assert_eq!(router.determine_route(&request).unwrap().provider, "anthropic");

        request.system = SystemPrompt::Blocks(vec![
            SystemBlock::text(BASE_SYSTEM_PROMPT),
            SystemBlock::text(REVIEWER_PROMPT),
            SystemBlock::text("extra"),
        ]);
        assert_eq!(router.determine_route(&request).unwrap().target_model, "claude-3-opus-20240229");
    }

    #[test]
    fn test_subagents_disabled_ignores_prompt() {
        let dir = tempfile::tempdir().unwrap();
        write_agent_file(dir.path(), "code-reviewer", REVIEWER_PROMPT).unwrap();
        let rules = ProviderRules::default();
        let table = AgentTable::load(&reviewer_mapping(), &[dir.path().to_path_buf()], &rules);
        let router = AgentRouter::new(false, table, rules, providers(&["anthropic", "openai"]));

        let request = subagent_request("claude-3-opus-20240229", REVIEWER_PROMPT, "- x");
        assert_eq!(router.determine_route(&request).unwrap().provider, "anthropic");
    }

    #[test]
    fn test_missing_agent_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ProviderRules::default();
        let table = AgentTable::load(&reviewer_mapping(), &[dir.path().to_path_buf()], &rules);
        assert!(table.is_empty());
    }

    #[test]
    fn test_agent_mapped_to_unconfigured_provider_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_agent_file(dir.path(), "code-reviewer", REVIEWER_PROMPT).unwrap();
        let rules = ProviderRules::default();
        let table = AgentTable::load(&reviewer_mapping(), &[dir.path().to_path_buf()], &rules);
        let router = AgentRouter::new(true, table, rules, providers(&["anthropic"]));

        let request = subagent_request("claude-3-opus-20240229", REVIEWER_PROMPT, "- x");
        let err = router.determine_route(&request).unwrap_err();
        assert!(err.to_string().contains("code-reviewer"));
    }
}
