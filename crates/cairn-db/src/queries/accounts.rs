//! Pool, subject and caller balances.
//!
//! Writers pass a [`Delta`] rather than an absolute balance, so writes made
//! in any order land on the same total.

use cairn_types::{Balance, CallerId, SubjectId};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{amount_at, conversion_error, parse_amount, DbError, Delta, Result};

/// Pool balance, or `None` before the pool was ever seeded.
pub fn pool_balance(conn: &Connection) -> Result<Option<Balance>> {
    let text: Option<String> = conn
        .query_row("SELECT balance FROM pool WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    text.map(|t| parse_amount(&t).map_err(DbError::Corrupt))
        .transpose()
}

/// Create the pool row unless it exists. Returns whether it was created.
pub fn seed_pool(conn: &Connection, balance: Balance, now: u64) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pool (id, balance, updated_at) VALUES (1, ?1, ?2)",
        params![balance.to_string(), now as i64],
    )?;
    Ok(inserted > 0)
}

pub fn adjust_pool(conn: &Connection, delta: Delta, now: u64) -> Result<Balance> {
    let current = pool_balance(conn)?.unwrap_or(0);
    let next = delta.apply(current)?;
    conn.execute(
        "INSERT INTO pool (id, balance, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at",
        params![next.to_string(), now as i64],
    )?;
    Ok(next)
}

pub fn subject_balance(conn: &Connection, subject_id: SubjectId) -> Result<Balance> {
    let text: Option<String> = conn
        .query_row(
            "SELECT balance FROM subject_accounts WHERE subject_id = ?1",
            [subject_id as i64],
            |row| row.get(0),
        )
        .optional()?;
    match text {
        Some(t) => parse_amount(&t).map_err(DbError::Corrupt),
        None => Ok(0),
    }
}

pub fn adjust_subject(
    conn: &Connection,
    subject_id: SubjectId,
    delta: Delta,
    now: u64,
) -> Result<Balance> {
    let next = delta.apply(subject_balance(conn, subject_id)?)?;
    conn.execute(
        "INSERT INTO subject_accounts (subject_id, balance, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(subject_id) DO UPDATE SET
             balance = excluded.balance, updated_at = excluded.updated_at",
        params![subject_id as i64, next.to_string(), now as i64],
    )?;
    Ok(next)
}

pub fn list_subjects(conn: &Connection) -> Result<Vec<(SubjectId, Balance)>> {
    let mut stmt = conn.prepare("SELECT subject_id, balance FROM subject_accounts")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)? as u64, amount_at(row, 1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn caller_balance(conn: &Connection, caller: &CallerId) -> Result<Balance> {
    let text: Option<String> = conn
        .query_row(
            "SELECT balance FROM caller_accounts WHERE caller = ?1",
            [caller.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match text {
        Some(t) => parse_amount(&t).map_err(DbError::Corrupt),
        None => Ok(0),
    }
}

pub fn adjust_caller(conn: &Connection, caller: &CallerId, delta: Delta, now: u64) -> Result<Balance> {
    let next = delta.apply(caller_balance(conn, caller)?)?;
    conn.execute(
        "INSERT INTO caller_accounts (caller, balance, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(caller) DO UPDATE SET
             balance = excluded.balance, updated_at = excluded.updated_at",
        params![caller.as_str(), next.to_string(), now as i64],
    )?;
    Ok(next)
}

pub fn list_callers(conn: &Connection) -> Result<Vec<(CallerId, Balance)>> {
    let mut stmt = conn.prepare("SELECT caller, balance FROM caller_accounts")?;
    let rows = stmt
        .query_map([], |row| {
            let caller: String = row.get(0)?;
            let caller = CallerId::new(caller).map_err(|e| conversion_error(0, e.to_string()))?;
            Ok((caller, amount_at(row, 1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_pool_seeded_once() {
        let conn = test_db();
        assert_eq!(pool_balance(&conn).expect("balance"), None);
        assert!(seed_pool(&conn, 500, 1).expect("seed"));
        assert!(!seed_pool(&conn, 900, 2).expect("seed again"));
        assert_eq!(pool_balance(&conn).expect("balance"), Some(500));
    }

    #[test]
    fn test_pool_deltas() {
        let conn = test_db();
        seed_pool(&conn, 100, 1).expect("seed");
        assert_eq!(adjust_pool(&conn, Delta::Debit(30), 2).expect("debit"), 70);
        assert_eq!(adjust_pool(&conn, Delta::Credit(5), 3).expect("credit"), 75);
        assert!(adjust_pool(&conn, Delta::Debit(76), 4).is_err());
        assert_eq!(pool_balance(&conn).expect("balance"), Some(75));
    }

    #[test]
    fn test_subject_accounts() {
        let conn = test_db();
        assert_eq!(subject_balance(&conn, 7).expect("balance"), 0);
        adjust_subject(&conn, 7, Delta::Credit(50), 1).expect("credit");
        adjust_subject(&conn, 7, Delta::Debit(20), 2).expect("debit");
        assert_eq!(subject_balance(&conn, 7).expect("balance"), 30);
        assert_eq!(list_subjects(&conn).expect("list"), vec![(7, 30)]);
    }

    #[test]
    fn test_caller_accounts() {
        let conn = test_db();
        let caller = CallerId::new("0xcaller").expect("caller");
        let big = u128::from(u64::MAX) * 3;
        adjust_caller(&conn, &caller, Delta::Credit(big), 1).expect("credit");
        assert_eq!(caller_balance(&conn, &caller).expect("balance"), big);
        assert!(matches!(
            adjust_caller(&conn, &caller, Delta::Debit(big + 1), 2),
            Err(DbError::Constraint(_))
        ));
        assert_eq!(list_callers(&conn).expect("list"), vec![(caller, big)]);
    }
}
