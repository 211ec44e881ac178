//! Squad name reservations
//!
//! A name belongs to at most one squad per guild. Inserting the reservation
//! row is the allocation; the primary key makes a second insert for the
//! same name a no-op.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_id, parse_id_opt, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{GuildId, RoleId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub guild_id: GuildId,
    pub name: String,
    /// Allocation attempt that owns the name
    pub session: Uuid,
    /// Exclusivity role, once created
    pub role_id: Option<RoleId>,
    pub reserved_at: DateTime<Utc>,
}

pub struct ReservationStore<'a> {
    conn: &'a Connection,
}

impl<'a> ReservationStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Claim a name. Returns false if it is already reserved.
    #[instrument(skip(self))]
    pub fn reserve(&self, guild_id: GuildId, name: &str, session: Uuid) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO name_reservations (guild_id, name, session, role_id, reserved_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![
                guild_id.to_string(),
                name,
                session.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Record the role created for a reservation
    #[instrument(skip(self))]
    pub fn attach_role(&self, guild_id: GuildId, name: &str, session: Uuid, role_id: RoleId) -> Result<()> {
        self.conn.execute(
            "UPDATE name_reservations SET role_id = ?1
             WHERE guild_id = ?2 AND name = ?3 AND session = ?4",
            params![
                role_id.to_string(),
                guild_id.to_string(),
                name,
                session.to_string()
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find(&self, guild_id: GuildId, name: &str) -> Result<Option<Reservation>> {
        let reservation = self
            .conn
            .query_row(
                "SELECT guild_id, name, session, role_id, reserved_at
                 FROM name_reservations WHERE guild_id = ?1 AND name = ?2",
                params![guild_id.to_string(), name],
                |row| {
                    Ok(Reservation {
                        guild_id: parse_id(&row.get::<_, String>(0)?)?,
                        name: row.get(1)?,
                        session: parse_uuid(&row.get::<_, String>(2)?)?,
                        role_id: parse_id_opt(row.get::<_, Option<String>>(3)?)?,
                        reserved_at: parse_datetime(&row.get::<_, String>(4)?)?,
                    })
                },
            )
            .optional()?;

        Ok(reservation)
    }

    /// Drop an allocation attempt that never got its role
    #[instrument(skip(self))]
    pub fn cancel(&self, guild_id: GuildId, name: &str, session: Uuid) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM name_reservations WHERE guild_id = ?1 AND name = ?2 AND session = ?3",
            params![guild_id.to_string(), name, session.to_string()],
        )?;
        Ok(deleted == 1)
    }

    /// Free a name whose role has been deleted
    #[instrument(skip(self))]
    pub fn release(&self, guild_id: GuildId, name: &str, role_id: RoleId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM name_reservations WHERE guild_id = ?1 AND name = ?2 AND role_id = ?3",
            params![guild_id.to_string(), name, role_id.to_string()],
        )?;
        Ok(deleted == 1)
    }

    /// Names currently reserved in a guild
    #[instrument(skip(self))]
    pub fn names(&self, guild_id: GuildId) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM name_reservations WHERE guild_id = ?1 ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![guild_id.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
