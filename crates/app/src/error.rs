//! Startup and command-line errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Core(#[from] lfg_core::Error),

    #[error("Platform error: {0}")]
    Platform(#[from] lfg_core::PlatformError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] lfg_net::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid interaction file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
