//! # cairn-db
//!
//! SQLite persistence for the Cairn daemon, stored at
//! `$CAIRN_DATA_DIR/cairn.db`.
//!
//! - WAL mode, foreign keys on
//! - Timestamps are Unix seconds
//! - Amounts are `u128` stored as decimal TEXT
//! - Schema version lives in `PRAGMA user_version`
//!
//! The in-memory registry and ledgers are authoritative while the daemon
//! runs; these tables are what they are rebuilt from at startup.

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;

use cairn_types::Balance;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("corrupt value: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Signed change to a stored balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Credit(Balance),
    Debit(Balance),
}

impl Delta {
    /// Apply to `current`, refusing overflow and overdraw.
    pub fn apply(self, current: Balance) -> Result<Balance> {
        match self {
            Delta::Credit(amount) => current
                .checked_add(amount)
                .ok_or_else(|| DbError::Constraint(format!("{current} + {amount} overflows"))),
            Delta::Debit(amount) => current
                .checked_sub(amount)
                .ok_or_else(|| DbError::Constraint(format!("{current} - {amount} overdraws"))),
        }
    }
}

/// Open or create the database at `path`, running pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

/// Read a TEXT amount column.
pub(crate) fn amount_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Balance> {
    let text: String = row.get(idx)?;
    parse_amount(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn parse_amount(text: &str) -> std::result::Result<Balance, String> {
    text.parse::<Balance>()
        .map_err(|e| format!("amount {text:?}: {e}"))
}

pub(crate) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}
