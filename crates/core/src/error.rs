//! Error types for LFG Core

use thiserror::Error;

use crate::codec::CodecError;
use crate::platform::PlatformError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Squad name {0} is already taken")]
    NameTaken(String),

    #[error("All squad names are currently taken")]
    NamePoolExhausted,

    #[error("Squad is full")]
    SquadFull,

    #[error("Squad is closed")]
    SquadClosed,

    #[error("Already a member of this squad")]
    AlreadyJoined,

    #[error("Not a member of this squad")]
    NotJoined,

    #[error("Concurrent update conflict on message {0}")]
    Conflict(String),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error describes something the invoking user did, as
    /// opposed to an internal failure that only belongs in the logs
    pub fn is_user_facing(&self) -> bool {
        match self {
            Error::Validation(_)
            | Error::PermissionDenied(_)
            | Error::NotFound(_)
            | Error::NameTaken(_)
            | Error::NamePoolExhausted
            | Error::SquadFull
            | Error::SquadClosed
            | Error::AlreadyJoined
            | Error::NotJoined
            | Error::Conflict(_) => true,
            Error::Codec(e) => e.is_user_facing(),
            _ => false,
        }
    }

    /// Text shown to the invoking user
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => format!("❌ {}", msg),
            Error::PermissionDenied(msg) => format!("⛔ {}", msg),
            Error::NotFound(msg) => format!("❌ {}", msg),
            Error::NameTaken(name) => {
                format!("❌ **{}** is already taken. Please pick another name.", name)
            }
            Error::NamePoolExhausted => {
                "❌ All squad names are currently taken. Please try again later.".to_string()
            }
            Error::SquadFull => "This squad is already full.".to_string(),
            Error::SquadClosed => "❌ This squad is already closed.".to_string(),
            Error::AlreadyJoined => "You are already in this squad.".to_string(),
            Error::NotJoined => "You are not in this squad.".to_string(),
            Error::Conflict(_) => {
                "❌ The squad was changed at the same time. Please try again.".to_string()
            }
            Error::Codec(e) if e.is_user_facing() => format!("❌ {}", e),
            _ => "❌ Something went wrong while running this action.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
