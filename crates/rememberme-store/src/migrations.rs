//! Schema versioning.
//!
//! The version lives in the `metadata` table. A fresh database is created
//! directly at [`CURRENT_VERSION`]; a database written by a newer build is
//! refused rather than silently misread.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::schema::SCHEMA_STATEMENTS;

pub const CURRENT_VERSION: i32 = 1;

const VERSION_KEY: &str = "schema_version";

/// Create missing tables and bring the schema up to [`CURRENT_VERSION`].
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }
    if version < CURRENT_VERSION {
        tracing::info!(from = version, to = CURRENT_VERSION, "migrating database schema");
        set_schema_version(conn, CURRENT_VERSION)?;
    }
    Ok(())
}

/// Stored schema version; 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM metadata WHERE key = ?1", [VERSION_KEY], |row| row.get(0))
        .optional()?;

    match value {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| StoreError::Migration(format!("invalid schema version: {v}"))),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_gets_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();
        assert!(matches!(initialize_schema(&conn), Err(StoreError::Migration(_))));
    }
}
