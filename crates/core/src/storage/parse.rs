//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Error as SqlError;
use uuid::Uuid;

fn conversion_error<E>(e: E) -> SqlError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SqlError::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

/// Parse a snowflake id (guild, channel, message, role) from a string column
pub fn parse_id<T>(s: &str) -> Result<T, SqlError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    s.parse().map_err(conversion_error)
}

/// Parse an optional snowflake id
pub fn parse_id_opt<T>(s: Option<String>) -> Result<Option<T>, SqlError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    s.map(|s| parse_id(&s)).transpose()
}

/// Parse a UUID from a database string column
pub fn parse_uuid(s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(conversion_error)
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(conversion_error)
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
