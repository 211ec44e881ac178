//! SQLite storage layer for LFG squads

mod expirations;
mod migrations;
mod parse;
mod reservations;
mod squads;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::instrument;

use crate::error::Result;

pub use expirations::{Expiration, ExpirationStore};
pub use reservations::{Reservation, ReservationStore};
pub use squads::{SquadRecord, SquadStore};

/// Database handle shared by the allocator, the lifecycle manager and the
/// expiry scheduler. The mutex is the critical section for name
/// reservations and is never held across an await point.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Lock the shared database, recovering from poisoning
pub fn lock(db: &Mutex<Database>) -> MutexGuard<'_, Database> {
    match db.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Database mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        let mut db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let mut db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&mut self) -> Result<()> {
        migrations::migrate(&mut self.conn)?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<u32> {
        migrations::current_version(&self.conn)
    }

    /// Wrap into the shared handle
    pub fn shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    /// Squad state, one row per post
    pub fn squads(&self) -> SquadStore<'_> {
        SquadStore::new(&self.conn)
    }

    /// Per-guild squad name reservations
    pub fn reservations(&self) -> ReservationStore<'_> {
        ReservationStore::new(&self.conn)
    }

    /// Pending squad expiries
    pub fn expirations(&self) -> ExpirationStore<'_> {
        ExpirationStore::new(&self.conn)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
