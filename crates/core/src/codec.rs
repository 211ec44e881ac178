//! Squad state codec
//!
//! The full squad state travels as `[[LFG:<json>]]` inside the post footer.
//! Decoding anything that is not a well-formed, structurally valid squad
//! yields a `CodecError`, which callers treat as "no session here".

use thiserror::Error;

use crate::models::Squad;

/// Platform limit on embed footer text, in characters
pub const FOOTER_LIMIT: usize = 2048;

const MARKER_OPEN: &str = "[[LFG:";
const MARKER_CLOSE: &str = "]]";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no squad state found")]
    Missing,

    #[error("malformed squad state: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid squad state: {0}")]
    Invalid(String),

    #[error("squad details are too long ({len} of {limit} characters)")]
    TooLarge { len: usize, limit: usize },
}

impl CodecError {
    /// Only oversize state is caused by user input
    pub fn is_user_facing(&self) -> bool {
        matches!(self, CodecError::TooLarge { .. })
    }
}

/// Encode a squad into its footer fragment
pub fn encode(squad: &Squad) -> Result<String, CodecError> {
    let json = serde_json::to_string(squad)?;
    let fragment = format!("{}{}{}", MARKER_OPEN, json, MARKER_CLOSE);
    let len = fragment.chars().count();
    if len > FOOTER_LIMIT {
        return Err(CodecError::TooLarge {
            len,
            limit: FOOTER_LIMIT,
        });
    }
    Ok(fragment)
}

/// Decode a squad from footer text
pub fn decode(text: &str) -> Result<Squad, CodecError> {
    let start = text.find(MARKER_OPEN).ok_or(CodecError::Missing)?;
    let body = &text[start + MARKER_OPEN.len()..];
    let end = body.rfind(MARKER_CLOSE).ok_or(CodecError::Missing)?;

    let squad: Squad = serde_json::from_str(&body[..end])?;
    squad.validate().map_err(CodecError::Invalid)?;
    Ok(squad)
}
