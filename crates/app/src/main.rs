//! LFG bot
//!
//! Runs the squad coordinator: opens the database, connects the Discord
//! REST adapter, re-arms pending expiries and serves the interaction
//! gateway until Ctrl-C.
//!
//! ```text
//! lfg-bot [config.toml]
//! lfg-bot send <interaction.json> [config.toml]
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lfg_core::{Database, Interaction, Platform, Router, SquadManager};
use lfg_net::{GatewayClient, GatewayServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod discord;
mod error;

use config::AppConfig;
use discord::DiscordRest;
use error::{AppError, Result};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = match args.first().map(String::as_str) {
        Some("send") => match args.get(1) {
            Some(file) => send(Path::new(file), args.get(2).map(String::as_str)).await,
            None => Err(AppError::Config("usage: lfg-bot send <interaction.json> [config]".into())),
        },
        arg => serve(arg).await,
    };

    if let Err(e) = outcome {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn serve(config_arg: Option<&str>) -> Result<()> {
    let path = config::config_path(config_arg, |key| std::env::var(key).ok());
    let config = AppConfig::load(&path)?;
    tracing::info!(config = %path.display(), "Starting LFG bot");

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&db_path)?.shared();
    tracing::info!(path = %db_path.display(), "Database ready");

    let platform = Arc::new(DiscordRest::new(&config.discord)?);
    let bot = platform.current_user().await?;
    tracing::info!(bot = %bot, "Authenticated with Discord");

    let (manager, due_rx) = SquadManager::new(db, platform, config.squads.clone());
    let manager = Arc::new(manager);
    let pending = manager.rehydrate()?;
    tracing::info!(pending, "Expiry timers restored");
    tokio::spawn(manager.clone().run_expiry(due_rx));

    let router = Arc::new(Router::new(manager));
    let server =
        GatewayServer::start(config.gateway.bind, config.gateway_token()?.to_string(), router)
            .await?;

    tokio::signal::ctrl_c().await?;
    let harnesses = server.harnesses().await;
    tracing::info!(harnesses = harnesses.len(), "Shutting down");
    server.shutdown();
    Ok(())
}

/// Deliver one interaction to a running bot and print the reply as JSON
async fn send(file: &Path, config_arg: Option<&str>) -> Result<()> {
    let path = config::config_path(config_arg, |key| std::env::var(key).ok());
    let mut config = AppConfig::read(&path)?;
    config.apply_env(|key| std::env::var(key).ok());

    let interaction: Interaction = serde_json::from_str(&std::fs::read_to_string(file)?)?;
    let client = GatewayClient::connect(config.gateway.bind, config.gateway_token()?.to_string())
        .await?
        .with_reply_timeout(Duration::from_secs(config.gateway.reply_timeout_secs));
    let reply = client.interact(&interaction).await;
    client.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&reply?)?);
    Ok(())
}
