//! Forward-only migrations keyed on `PRAGMA user_version`.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current == SCHEMA_VERSION {
        return Ok(());
    }
    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    if current == 0 {
        tracing::info!(version = SCHEMA_VERSION, "initializing database schema");
        conn.execute_batch(schema::SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        return Ok(());
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        tracing::info!(version, "running migration");
        migrate_to(conn, version)?;
        conn.pragma_update(None, "user_version", version)?;
    }
    Ok(())
}

fn migrate_to(_conn: &Connection, version: u32) -> Result<()> {
    Err(DbError::Migration(format!("unknown migration version: {version}")))
}
