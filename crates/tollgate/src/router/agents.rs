//! Agent definition files and the fingerprint table built from them

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::{ProviderRules, fingerprint, static_prompt};
use crate::error::{Result, TollgateError};

/// Separator between an agent file's metadata and its prompt
const FRONT_MATTER_SEPARATOR: &str = "\n---\n";

/// A subagent the operator wants routed elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefinition {
    pub name: String,
    pub target_model: String,
    pub target_provider: String,
    /// Prompt text up to the `Notes:` section, trimmed
    pub static_prompt: String,
    pub fingerprint: String,
}

impl AgentDefinition {
    pub fn new(name: &str, target_model: &str, target_provider: &str, prompt: &str) -> Self {
        let static_prompt = static_prompt(prompt).to_string();
        Self {
            name: name.to_string(),
            target_model: target_model.to_string(),
            target_provider: target_provider.to_string(),
            fingerprint: fingerprint(&static_prompt),
            static_prompt,
        }
    }
}

/// Path of an agent file under a search root
pub fn agent_path(root: &Path, name: &str) -> PathBuf {
    root.join(".claude").join("agents").join(format!("{name}.md"))
}

/// Extract the system prompt from `<metadata>\n---\n<prompt>`.
///
/// The split happens at the first separator after the metadata, so a
/// leading `---` line that opens the front matter is skipped.
pub fn parse_agent_file(content: &str) -> Result<String> {
    let content = content.replace("\r\n", "\n");
    let body = content.strip_prefix("---\n").unwrap_or(&content);
    let (_, prompt) = body.split_once(FRONT_MATTER_SEPARATOR).ok_or_else(|| {
        TollgateError::Config("agent file has no '---' separator before the prompt".to_string())
    })?;

    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(TollgateError::Config("agent file has an empty prompt".to_string()));
    }
    Ok(prompt.to_string())
}

/// Fingerprint -> agent definition, immutable once loaded
#[derive(Debug, Clone, Default)]
pub struct AgentTable {
    by_fingerprint: HashMap<String, AgentDefinition>,
}

impl AgentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every mapped agent, trying each search root in order.
    ///
    /// Agents whose file is missing or malformed, or whose model resolves to
    /// no provider, are logged and skipped.
    pub fn load(
        mappings: &BTreeMap<String, String>,
        search_roots: &[PathBuf],
        rules: &ProviderRules,
    ) -> Self {
        let mut table = Self::new();

        for (name, target_model) in mappings {
            let Some(target_provider) = rules.resolve(target_model) else {
                tracing::warn!(agent = %name, model = %target_model, "No provider for agent model, skipping");
                continue;
            };

            match load_prompt(name, search_roots) {
                Ok((path, prompt)) => {
                    let definition = AgentDefinition::new(name, target_model, &target_provider, &prompt);
                    tracing::info!(
                        agent = %name,
                        model = %target_model,
                        provider = %target_provider,
                        fingerprint = %definition.fingerprint,
                        path = %path.display(),
                        "Loaded subagent mapping"
                    );
                    table.insert(definition);
                }
                Err(e) => {
                    tracing::warn!(agent = %name, "Failed to load agent definition: {e}");
                }
            }
        }

        tracing::info!("Loaded {} of {} subagent mappings", table.len(), mappings.len());
        table
    }

    pub fn insert(&mut self, definition: AgentDefinition) {
        if let Some(previous) = self.by_fingerprint.get(&definition.fingerprint) {
            tracing::warn!(
                agent = %definition.name,
                shadowed = %previous.name,
                "Two agents share a prompt fingerprint; the later one wins"
            );
        }
        self.by_fingerprint.insert(definition.fingerprint.clone(), definition);
    }

    pub fn get(&self, fingerprint: &str) -> Option<&AgentDefinition> {
        self.by_fingerprint.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }
}

fn load_prompt(name: &str, search_roots: &[PathBuf]) -> Result<(PathBuf, String)> {
    for root in search_roots {
        let path = agent_path(root, name);
        if !path.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        let prompt = parse_agent_file(&content)
            .map_err(|e| TollgateError::Config(format!("{}: {e}", path.display())))?;
        return Ok((path, prompt));
    }

    Err(TollgateError::Config(format!(
        "no {name}.md found in any .claude/agents directory"
    )))
}
