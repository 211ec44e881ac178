//! Schema versioning
//!
//! Each step runs once, in order, inside its own transaction together with
//! the row recording it in `schema_migrations`.

use rusqlite::{params, Connection};
use tracing::{debug, info, instrument};

use crate::error::Result;

struct Step {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        description: "squads and name reservations",
        sql: r#"
            -- One row per squad post; blob is the encoded squad state
            CREATE TABLE squads (
                message_id TEXT PRIMARY KEY,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                blob TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX idx_squads_guild ON squads(guild_id);

            CREATE TABLE name_reservations (
                guild_id TEXT NOT NULL,
                name TEXT NOT NULL,
                session TEXT NOT NULL,
                role_id TEXT,
                reserved_at TEXT NOT NULL,
                PRIMARY KEY (guild_id, name)
            );
        "#,
    },
    Step {
        version: 2,
        description: "durable expiry schedule",
        sql: r#"
            CREATE TABLE expirations (
                message_id TEXT PRIMARY KEY,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                due_at TEXT NOT NULL
            );
            CREATE INDEX idx_expirations_due ON expirations(due_at);
        "#,
    },
];

/// Highest applied version, 0 for a fresh database
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

/// Bring the schema up to date. Returns the resulting version.
#[instrument(skip(conn))]
pub fn migrate(conn: &mut Connection) -> Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;

    let start = current_version(conn)?;
    debug!(version = start, "Schema version before migrating");

    let mut version = start;
    for step in STEPS.iter().filter(|s| s.version > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![step.version, step.description, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        info!(version = step.version, description = step.description, "Applied migration");
        version = step.version;
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let latest = STEPS.last().map(|s| s.version).unwrap();
        assert_eq!(migrate(&mut conn).unwrap(), latest);
        assert_eq!(migrate(&mut conn).unwrap(), latest);
        assert_eq!(current_version(&conn).unwrap(), latest);

        for table in ["squads", "name_reservations", "expirations"] {
            assert!(table_exists(&conn, table), "{} missing", table);
        }
    }

    #[test]
    fn test_resumes_from_partial_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, description TEXT NOT NULL, applied_at TEXT NOT NULL);",
        )
        .unwrap();
        conn.execute_batch(STEPS[0].sql).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations VALUES (1, 'x', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        assert!(!table_exists(&conn, "expirations"));
        assert_eq!(migrate(&mut conn).unwrap(), 2);
        assert!(table_exists(&conn, "expirations"));
    }

    #[test]
    fn test_fresh_database_records_every_step() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")
            .unwrap();
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        let expected: Vec<u32> = STEPS.iter().map(|s| s.version).collect();
        assert_eq!(applied, expected);
    }

    #[test]
    fn test_steps_are_sequential() {
        for (i, step) in STEPS.iter().enumerate() {
            assert_eq!(step.version as usize, i + 1, "{}", step.description);
        }
    }
}
