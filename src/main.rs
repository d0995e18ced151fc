//! Chess arena server binary.
//!
//! Wires configuration from flags/environment, starts the idle reaper and
//! serves the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chess_arena::api::{create_router, AppState};
use chess_arena::config::{ArenaConfig, SideDefaults};
use chess_arena::game::PromptSchema;
use chess_arena::registry::SessionReaper;

/// CLI arguments. Every flag falls back to an environment variable.
#[derive(Parser, Debug)]
#[command(name = "chess-arena")]
#[command(about = "Multi-session arena server for LLM chess")]
struct Args {
    /// HTTP listen address.
    #[arg(long, env = "ARENA_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    listen_addr: String,

    /// Default chat-completions endpoint for White.
    #[arg(long, env = "WHITE_API_URL")]
    white_api_url: Option<String>,

    /// Default credential for White.
    #[arg(long, env = "WHITE_API_KEY")]
    white_api_key: Option<String>,

    /// Default model for White.
    #[arg(long, env = "WHITE_MODEL")]
    white_model: Option<String>,

    /// Default chat-completions endpoint for Black.
    #[arg(long, env = "BLACK_API_URL")]
    black_api_url: Option<String>,

    /// Default credential for Black.
    #[arg(long, env = "BLACK_API_KEY")]
    black_api_key: Option<String>,

    /// Default model for Black.
    #[arg(long, env = "BLACK_MODEL")]
    black_model: Option<String>,

    /// LLM attempts per turn before a forfeit.
    #[arg(long, env = "ARENA_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Password that waives the shared-credential cooldown.
    #[arg(long, env = "ARENA_BYPASS_PASSWORD")]
    bypass_password: Option<String>,

    /// Path of the append-only LLM exchange log.
    #[arg(long, env = "ARENA_EXCHANGE_LOG", default_value = "llm_exchanges.jsonl")]
    exchange_log: PathBuf,

    /// Prompt schema: "json" or "san".
    #[arg(long, env = "ARENA_PROMPT_SCHEMA", default_value = "json")]
    prompt_schema: PromptSchema,

    /// Shared-credential cooldown window, in seconds.
    #[arg(long, env = "ARENA_COOLDOWN_SECS", default_value_t = 1200)]
    cooldown_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chess_arena=info")),
        )
        .init();

    let args = Args::parse();
    let config = ArenaConfig {
        listen_addr: args.listen_addr,
        white_defaults: SideDefaults {
            api_url: args.white_api_url,
            api_key: args.white_api_key,
            model: args.white_model,
        },
        black_defaults: SideDefaults {
            api_url: args.black_api_url,
            api_key: args.black_api_key,
            model: args.black_model,
        },
        max_retries: args.max_retries,
        bypass_password: args.bypass_password,
        exchange_log_path: args.exchange_log,
        prompt_schema: args.prompt_schema,
        cooldown_window: Duration::from_secs(args.cooldown_secs),
        ..ArenaConfig::default()
    };
    config
        .validate()
        .map_err(|error| anyhow::anyhow!("invalid configuration: {error}"))?;

    let state = AppState::new(config.clone());

    // Idle reaper: sweeps every five minutes, removing sessions whose game
    // finished more than an hour ago.
    let cancel = CancellationToken::new();
    let reaper = SessionReaper::new(
        Arc::clone(&state.registry),
        config.reap_interval,
        config.finished_ttl,
        cancel.clone(),
    );
    tokio::spawn(async move { reaper.run().await });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "arena server listening");
    axum::serve(listener, app).await?;

    cancel.cancel();
    Ok(())
}
