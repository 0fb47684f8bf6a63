//! Command-line interface and configuration loading.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use vg_domain::config::{Config, LlmBackend};

#[derive(Parser)]
#[command(name = "vigila", about = "Conversational backend for veterinary inspection data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server (default).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version and exit.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration and report issues.
    Validate,
    /// Print the effective configuration (after env overrides).
    Show,
}

/// Load `config.toml` (or `$VIGILA_CONFIG`) and apply env overrides.
/// A missing file is not an error: defaults describe a working local
/// deployment.
pub fn load_config() -> anyhow::Result<(Config, PathBuf)> {
    let path = std::env::var("VIGILA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config);
    Ok((config, path))
}

/// Environment variables override the file. Only operational knobs are
/// exposed this way; everything else stays in the document.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(host) = env_str("VG_HOST") {
        config.server.host = host;
    }
    if let Some(port) = env_parse::<u16>("VG_PORT") {
        config.server.port = port;
    }
    if let Some(backend) = env_str("VG_LLM_BACKEND") {
        match backend.as_str() {
            "ollama" => config.llm.backend = LlmBackend::Ollama,
            "openai_compat" => config.llm.backend = LlmBackend::OpenaiCompat,
            other => tracing::warn!(backend = other, "unknown VG_LLM_BACKEND, ignoring"),
        }
    }
    if let Some(url) = env_str("VG_LLM_BASE_URL") {
        config.llm.base_url = url;
    }
    if let Some(model) = env_str("VG_LLM_MODEL") {
        config.llm.model = model;
    }
    if let Some(ttl) = env_parse::<u64>("VG_SESSION_TTL_S") {
        config.session.ttl_s = ttl;
    }
    if let Some(timeout) = env_parse::<u64>("VG_GRAPH_TIMEOUT_S") {
        config.session.graph_timeout_s = timeout;
    }
    if let Some(allow) = env_str("VG_ALLOW_EXTERNAL_LLM") {
        config.gdpr.allow_external_llm = matches!(allow.as_str(), "1" | "true" | "yes");
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}
