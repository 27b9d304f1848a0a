//! Test utilities for tollgate - shared fixtures
//!
//! Builders for canonical requests, agent definition files and an
//! application state wired to mock upstreams.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::config::{Config, OpenAiConfig};
use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::proxy::AppState;
use crate::router::{AgentRouter, AgentTable, ProviderRules, agent_path};
use crate::storage::{MemoryStore, RequestStore};
use crate::translate::{CanonicalRequest, Message, SystemBlock, SystemPrompt};

/// Opening of the assistant's own base system prompt
pub const BASE_SYSTEM_PROMPT: &str =
    "You are Claude Code, Anthropic's official CLI for Claude. Help the user with software tasks.";

/// Static prompt used for the `code-reviewer` fixture agent
pub const REVIEWER_PROMPT: &str =
    "You are a meticulous code reviewer. Point out bugs, risky changes and missing tests.";

/// Single user text message, no system prompt
pub fn canonical_request(model: &str, text: &str) -> CanonicalRequest {
    CanonicalRequest {
        model: model.to_string(),
        system: SystemPrompt::default(),
        messages: vec![Message::user(text)],
        max_tokens: Some(1024),
        temperature: None,
        stream: false,
        tools: Vec::new(),
        extra: Default::default(),
    }
}

/// Request shaped like a subagent call: base prompt block, then the agent's
/// prompt followed by a dynamic `Notes:` section
pub fn subagent_request(model: &str, agent_prompt: &str, notes: &str) -> CanonicalRequest {
    let mut request = canonical_request(model, "Review the latest diff.");
    request.system = SystemPrompt::Blocks(vec![
        SystemBlock::text(BASE_SYSTEM_PROMPT),
        SystemBlock::text(format!("{agent_prompt}\n\nNotes:\n{notes}")),
    ]);
    request
}

/// Write `<root>/.claude/agents/<name>.md` with a metadata header
pub fn write_agent_file(root: &Path, name: &str, prompt: &str) -> Result<PathBuf> {
    let path = agent_path(root, name);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = format!("---\nname: {name}\ndescription: fixture agent\n---\n{prompt}\n");
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Config pointing Anthropic (and optionally OpenAI) at local mock servers
pub fn test_config(anthropic_url: &str, openai_url: Option<&str>) -> Config {
    let mut config = Config::default();
    config.providers.timeout_secs = 5;
    config.providers.anthropic.base_url = anthropic_url.to_string();
    config.providers.openai = openai_url.map(|url| OpenAiConfig {
        base_url: url.to_string(),
        api_key: "sk-test-openai".to_string(),
    });
    config
}

/// Router with agents loaded from `agent_root` using `mappings`
pub fn test_router(
    config: &Config,
    registry: &ProviderRegistry,
    agent_root: Option<&Path>,
    mappings: &BTreeMap<String, String>,
) -> AgentRouter {
    let rules = ProviderRules::from_config(&config.routing);
    let agents = match agent_root {
        Some(root) => AgentTable::load(mappings, &[root.to_path_buf()], &rules),
        None => AgentTable::new(),
    };
    AgentRouter::new(agent_root.is_some(), agents, rules, registry.names())
}

/// Full application state backed by an in-memory store
pub fn test_state(
    config: Config,
    agent_root: Option<&Path>,
    mappings: &BTreeMap<String, String>,
) -> Result<(Arc<AppState>, Arc<MemoryStore>)> {
    let registry = ProviderRegistry::from_config(&config.providers)?;
    let router = test_router(&config, &registry, agent_root, mappings);
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn RequestStore> = store.clone();

    let state = AppState::new(config, registry, Arc::new(router), dyn_store);
    Ok((Arc::new(state), store))
}

/// Upstream that answers one request with an SSE head and `sse`, then
/// keeps the connection open without sending anything more.
///
/// Reports when the proxy side hangs up.
pub struct StalledUpstream {
    addr: SocketAddr,
    closed: oneshot::Receiver<()>,
}

impl StalledUpstream {
    pub async fn start(sse: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{sse}\r\n",
            sse.len()
        );
        let (closed_tx, closed) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = vec![0u8; 16 * 1024];
            if socket.read(&mut buf).await.is_err()
                || socket.write_all(response.as_bytes()).await.is_err()
            {
                return;
            }
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = closed_tx.send(());
        });

        Ok(Self { addr, closed })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Whether the connection was closed within `within`
    pub async fn hung_up_within(self, within: Duration) -> bool {
        matches!(tokio::time::timeout(within, self.closed).await, Ok(Ok(())))
    }
}
