//! Bot configuration
//!
//! A TOML file with `[discord]`, `[gateway]`, `[storage]` and `[squads]`
//! tables. Secrets may come from the environment instead of the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use lfg_core::SquadConfig;
use serde::Deserialize;
use tracing::info;

use crate::error::{AppError, Result};

const DEFAULT_CONFIG_FILE: &str = "lfg.toml";
const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
    pub squads: SquadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: Option<String>,
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    /// Shared secret harnesses present when connecting
    pub token: Option<String>,
    /// How long `send` waits for the bot's reply
    pub reply_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7341)),
            token: None,
            reply_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
}

/// Config file location: explicit argument, then `LFG_CONFIG`, then
/// `lfg.toml` in the working directory
pub fn config_path(arg: Option<&str>, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    arg.map(PathBuf::from)
        .or_else(|| env("LFG_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read the file if it exists; a missing file means all defaults
    pub fn read(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// `DISCORD_TOKEN` (or `TOKEN`) and `LFG_GATEWAY_TOKEN` win over the file
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(token) = non_empty(env("DISCORD_TOKEN")).or_else(|| non_empty(env("TOKEN"))) {
            self.discord.token = Some(token);
        }
        if let Some(token) = non_empty(env("LFG_GATEWAY_TOKEN")) {
            self.gateway.token = Some(token);
        }
    }

    pub fn validate(&mut self) -> Result<()> {
        self.discord.token = non_empty(self.discord.token.take());
        self.gateway.token = non_empty(self.gateway.token.take());

        if self.discord.token.is_none() {
            return Err(AppError::Config(
                "Discord token missing; set [discord] token or DISCORD_TOKEN".into(),
            ));
        }
        self.gateway_token()?;
        if self.gateway.reply_timeout_secs == 0 {
            return Err(AppError::Config("[gateway] reply_timeout_secs must be positive".into()));
        }
        self.squads.validate()?;
        Ok(())
    }

    pub fn gateway_token(&self) -> Result<&str> {
        self.gateway.token.as_deref().ok_or_else(|| {
            AppError::Config("Gateway token missing; set [gateway] token or LFG_GATEWAY_TOKEN".into())
        })
    }

    /// Configured database path, or `lfg.db` in the platform data directory
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.path {
            return Ok(path.clone());
        }
        let dirs = ProjectDirs::from("dev", "lfg", "lfg-bot")
            .ok_or_else(|| AppError::Config("Could not determine data directory".into()))?;
        Ok(dirs.data_dir().join("lfg.db"))
    }
}
