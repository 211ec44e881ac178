//! Durable expiry schedule
//!
//! Pending squad expiries survive restarts; the scheduler re-arms every row
//! on start-up.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::instrument;

use super::parse::{parse_datetime, parse_id, OptionalExt};
use crate::error::Result;
use crate::models::{ChannelId, GuildId, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiration {
    pub message_id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub due_at: DateTime<Utc>,
}

pub struct ExpirationStore<'a> {
    conn: &'a Connection,
}

impl<'a> ExpirationStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Schedule or reschedule an expiry
    #[instrument(skip(self, expiration), fields(message_id = %expiration.message_id))]
    pub fn upsert(&self, expiration: &Expiration) -> Result<()> {
        self.conn.execute(
            "INSERT INTO expirations (message_id, guild_id, channel_id, due_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(message_id) DO UPDATE SET due_at = ?4",
            params![
                expiration.message_id.to_string(),
                expiration.guild_id.to_string(),
                expiration.channel_id.to_string(),
                expiration.due_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find(&self, message_id: MessageId) -> Result<Option<Expiration>> {
        let expiration = self
            .conn
            .query_row(
                "SELECT message_id, guild_id, channel_id, due_at FROM expirations WHERE message_id = ?1",
                params![message_id.to_string()],
                Self::from_row,
            )
            .optional()?;
        Ok(expiration)
    }

    /// Remove a pending expiry. Returns false if none was scheduled.
    #[instrument(skip(self))]
    pub fn remove(&self, message_id: MessageId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM expirations WHERE message_id = ?1",
            params![message_id.to_string()],
        )?;
        Ok(deleted == 1)
    }

    /// Every pending expiry, soonest first
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Expiration>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, guild_id, channel_id, due_at FROM expirations ORDER BY due_at",
        )?;
        let rows = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Expiration> {
        Ok(Expiration {
            message_id: parse_id(&row.get::<_, String>(0)?)?,
            guild_id: parse_id(&row.get::<_, String>(1)?)?,
            channel_id: parse_id(&row.get::<_, String>(2)?)?,
            due_at: parse_datetime(&row.get::<_, String>(3)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn expiration(message: u64, minutes: i64) -> Expiration {
        Expiration {
            message_id: MessageId(message),
            guild_id: GuildId(1),
            channel_id: ChannelId(2),
            due_at: Utc::now() + chrono::Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_upsert_reschedules() {
        let db = Database::open_in_memory().unwrap();
        let store = db.expirations();
        store.upsert(&expiration(10, 60)).unwrap();
        let later = expiration(10, 240);
        store.upsert(&later).unwrap();

        let found = store.find(MessageId(10)).unwrap().unwrap();
        assert_eq!(found.due_at, later.due_at);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_orders_by_due_time() {
        let db = Database::open_in_memory().unwrap();
        let store = db.expirations();
        store.upsert(&expiration(1, 90)).unwrap();
        store.upsert(&expiration(2, 15)).unwrap();

        let ids: Vec<_> = store.list().unwrap().iter().map(|e| e.message_id).collect();
        assert_eq!(ids, vec![MessageId(2), MessageId(1)]);
    }

    #[test]
    fn test_remove() {
        let db = Database::open_in_memory().unwrap();
        let store = db.expirations();
        store.upsert(&expiration(1, 5)).unwrap();
        assert!(store.remove(MessageId(1)).unwrap());
        assert!(!store.remove(MessageId(1)).unwrap());
    }
}
