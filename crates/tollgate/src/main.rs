//! Tollgate daemon - recording proxy between a coding assistant and LLM APIs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::TollgateError;
use tollgate::config::Config;
use tollgate::error::Result;
use tollgate::provider::ProviderRegistry;
use tollgate::proxy::{AppState, ProxyServer};
use tollgate::router::AgentRouter;
use tollgate::storage::SqliteStore;

/// Tollgate - transparent LLM proxy that records every request
#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "A transparent HTTP proxy that records LLM traffic and routes subagents")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tollgate=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn read_config(path: &Path) -> Result<Config> {
    tracing::info!("Loading config from: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| {
        TollgateError::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    Config::from_toml_str(&content)
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let config = match config_path {
        Some(path) => read_config(&path)?,
        None => {
            let default_paths = [
                dirs::home_dir().map(|h| h.join(".tollgate").join("config.toml")),
                dirs::config_dir().map(|c| c.join("tollgate").join("config.toml")),
                Some(PathBuf::from("config.toml")),
            ];

            match default_paths.iter().flatten().find(|p| p.exists()) {
                Some(path) => read_config(path)?,
                None => {
                    tracing::info!("No config file found, using defaults");
                    Config::default()
                }
            }
        }
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Tollgate");

    let config = load_config(config_path)?;
    tracing::debug!(
        listen_addr = %config.server.listen_addr,
        db_path = %config.storage.db_path.display(),
        "Config loaded"
    );

    let store = SqliteStore::open(&config.storage.db_path)?;
    let registry = ProviderRegistry::from_config(&config.providers)?;
    let router = AgentRouter::from_config(&config, registry.names());

    let state = AppState::new(config, registry, Arc::new(router), Arc::new(store));
    ProxyServer::new(state).serve().await
}
