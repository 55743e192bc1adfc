//! Key/value runtime settings.

use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// Setting toggled through `set_auto_pin`.
pub const AUTO_PIN_ENABLED: &str = "auto_pin_enabled";

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

/// Read a boolean setting, falling back to `default` when unset.
pub fn get_bool(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    Ok(get(conn, key)?
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default))
}

pub fn set_bool(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set(conn, key, if value { "true" } else { "false" })
}
