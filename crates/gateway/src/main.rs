use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use vg_domain::config::{Config, ConfigSeverity, CorsConfig};
use vg_gateway::api;
use vg_gateway::cli::{Cli, Command, ConfigCommand};
use vg_gateway::runtime::sender_lock::SenderLockMap;
use vg_gateway::state::AppState;
use vg_providers::build_provider;
use vg_sessions::SessionStore;
use vg_tools::{build_registry, InMemoryBackend};

use vg_dialogue::{ConversationGraph, StaticRetriever};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = vg_gateway::cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = vg_gateway::cli::load_config()?;
            let issues = config.validate();
            if issues.is_empty() {
                println!("{}: configurazione valida", config_path.display());
                return Ok(());
            }
            for issue in &issues {
                let tag = match issue.severity {
                    ConfigSeverity::Warning => "warning",
                    ConfigSeverity::Error => "error",
                };
                println!("{tag}: {issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = vg_gateway::cli::load_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("vigila {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vg_gateway=debug")),
        )
        .init();
}

/// Start the server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Vigila starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── LLM provider ─────────────────────────────────────────────────
    let provider = build_provider(&config).context("initializing LLM provider")?;
    if !provider.ping().await {
        tracing::warn!(
            base_url = %config.llm.base_url,
            "LLM backend not reachable at startup; turns will degrade to fallback until it is"
        );
    }

    // ── Data backend ─────────────────────────────────────────────────
    // The production deployment swaps this for the SQL/vector-backed
    // implementation; the built-in one serves the demo dataset.
    let backend: Arc<dyn vg_tools::DataBackend> = Arc::new(InMemoryBackend::new());
    tracing::info!("data backend ready");

    // ── Tool registry ────────────────────────────────────────────────
    let tools = Arc::new(build_registry(backend.clone()));
    tracing::info!(tools = tools.len(), "tool registry ready");

    // ── Conversation graph ───────────────────────────────────────────
    let graph = Arc::new(
        ConversationGraph::new(
            provider.clone(),
            Arc::new(StaticRetriever::new()),
            tools,
            config.clone(),
        )
        .context("building conversation graph")?,
    );
    tracing::info!("conversation graph ready");

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new(&config.session));
    let sender_locks = Arc::new(SenderLockMap::new());
    tracing::info!(
        ttl_s = config.session.ttl_s,
        graph_timeout_s = config.session.graph_timeout_s,
        "session store ready"
    );

    let state = AppState {
        config: config.clone(),
        provider,
        backend,
        graph,
        sessions: sessions.clone(),
        sender_locks: sender_locks.clone(),
    };

    // ── Background tick: session eviction + lock pruning ─────────────
    {
        let sessions = sessions.clone();
        let sender_locks = sender_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                sessions.purge_expired(chrono::Utc::now());
                sender_locks.prune_idle();
            }
        });
    }

    // ── Router + layers ──────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let app = api::router()
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "Vigila listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// A trailing `:*` wildcard matches any port on that host; a literal `"*"`
/// allows every origin (not recommended outside development).
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin_str = origin.to_str().unwrap_or("");
            // The remainder after the prefix must be digits only, so that
            // "http://localhost:3000.evil.com" cannot slip through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
