//! Quota cycle rows.

use cairn_types::{Balance, QuotaCycle};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{amount_at, DbError, Result};

fn row_to_cycle(row: &Row<'_>) -> rusqlite::Result<QuotaCycle> {
    Ok(QuotaCycle {
        cycle_id: row.get(0)?,
        total: amount_at(row, 1)?,
        used: amount_at(row, 2)?,
    })
}

pub fn get(conn: &Connection, cycle_id: u32) -> Result<Option<QuotaCycle>> {
    let cycle = conn
        .query_row(
            "SELECT cycle_id, total, used FROM quota_cycles WHERE cycle_id = ?1",
            [cycle_id],
            row_to_cycle,
        )
        .optional()?;
    Ok(cycle)
}

/// The most recent cycle on record.
pub fn latest(conn: &Connection) -> Result<Option<QuotaCycle>> {
    let cycle = conn
        .query_row(
            "SELECT cycle_id, total, used FROM quota_cycles ORDER BY cycle_id DESC LIMIT 1",
            [],
            row_to_cycle,
        )
        .optional()?;
    Ok(cycle)
}

/// Record `cycle` unless a row for its id exists.
pub fn open_cycle(conn: &Connection, cycle: &QuotaCycle, now: u64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO quota_cycles (cycle_id, total, used, opened_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            cycle.cycle_id,
            cycle.total.to_string(),
            cycle.used.to_string(),
            now as i64
        ],
    )?;
    Ok(())
}

/// Count `amount` against a cycle, opening it with `total` if needed.
pub fn add_used(
    conn: &Connection,
    cycle_id: u32,
    total: Balance,
    amount: Balance,
    now: u64,
) -> Result<QuotaCycle> {
    open_cycle(conn, &QuotaCycle::new(cycle_id, total), now)?;
    let mut cycle = get(conn, cycle_id)?
        .ok_or_else(|| DbError::NotFound(format!("quota cycle {cycle_id}")))?;
    cycle.used = cycle
        .used
        .checked_add(amount)
        .filter(|used| *used <= cycle.total)
        .ok_or_else(|| {
            DbError::Constraint(format!("cycle {cycle_id}: {amount} exceeds remaining quota"))
        })?;
    conn.execute(
        "UPDATE quota_cycles SET used = ?1 WHERE cycle_id = ?2",
        params![cycle.used.to_string(), cycle_id],
    )?;
    Ok(cycle)
}

pub fn list(conn: &Connection) -> Result<Vec<QuotaCycle>> {
    let mut stmt =
        conn.prepare("SELECT cycle_id, total, used FROM quota_cycles ORDER BY cycle_id")?;
    let rows = stmt
        .query_map([], row_to_cycle)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
