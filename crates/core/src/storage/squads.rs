//! Squad record storage
//!
//! Each row holds the encoded squad state for one post together with a
//! version stamp. Writers must present the version they read; a mismatch
//! means someone else wrote in between and the caller has to re-read.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::instrument;

use super::parse::{parse_datetime, parse_id, OptionalExt};
use crate::error::Result;
use crate::models::{ChannelId, GuildId, MessageId};

/// A stored squad row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquadRecord {
    pub message_id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// Codec fragment, exactly as rendered into the post footer
    pub blob: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

pub struct SquadStore<'a> {
    conn: &'a Connection,
}

impl<'a> SquadStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new squad at version 1
    #[instrument(skip(self, blob))]
    pub fn insert(
        &self,
        message_id: MessageId,
        guild_id: GuildId,
        channel_id: ChannelId,
        blob: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO squads (message_id, guild_id, channel_id, blob, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            params![
                message_id.to_string(),
                guild_id.to_string(),
                channel_id.to_string(),
                blob,
                now,
            ],
        )?;
        Ok(())
    }

    /// Find a squad by its post
    #[instrument(skip(self))]
    pub fn find(&self, message_id: MessageId) -> Result<Option<SquadRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT message_id, guild_id, channel_id, blob, version, updated_at
                 FROM squads WHERE message_id = ?1",
                params![message_id.to_string()],
                |row| {
                    Ok(SquadRecord {
                        message_id: parse_id(&row.get::<_, String>(0)?)?,
                        guild_id: parse_id(&row.get::<_, String>(1)?)?,
                        channel_id: parse_id(&row.get::<_, String>(2)?)?,
                        blob: row.get(3)?,
                        version: row.get(4)?,
                        updated_at: parse_datetime(&row.get::<_, String>(5)?)?,
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    /// Replace the blob if the stored version still equals `expected`.
    /// Returns false when the row moved on (or vanished).
    #[instrument(skip(self, blob))]
    pub fn compare_and_swap(&self, message_id: MessageId, expected: u64, blob: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE squads SET blob = ?1, version = version + 1, updated_at = ?2
             WHERE message_id = ?3 AND version = ?4",
            params![blob, Utc::now().to_rfc3339(), message_id.to_string(), expected],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        db.squads()
            .insert(MessageId(1), GuildId(2), ChannelId(3), "[[LFG:{}]]")
            .unwrap();

        let record = db.squads().find(MessageId(1)).unwrap().unwrap();
        assert_eq!(record.guild_id, GuildId(2));
        assert_eq!(record.channel_id, ChannelId(3));
        assert_eq!(record.version, 1);
        assert!(db.squads().find(MessageId(9)).unwrap().is_none());
    }

    #[test]
    fn test_compare_and_swap_rejects_stale_version() {
        let db = Database::open_in_memory().unwrap();
        let squads = db.squads();
        squads.insert(MessageId(1), GuildId(2), ChannelId(3), "v1").unwrap();

        assert!(squads.compare_and_swap(MessageId(1), 1, "v2").unwrap());
        // A second writer that also read version 1 loses
        assert!(!squads.compare_and_swap(MessageId(1), 1, "v2-stale").unwrap());

        let record = squads.find(MessageId(1)).unwrap().unwrap();
        assert_eq!(record.blob, "v2");
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_compare_and_swap_missing_row() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.squads().compare_and_swap(MessageId(5), 1, "x").unwrap());
    }
}
