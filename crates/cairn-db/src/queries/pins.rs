//! Current and superseded pin records.

use cairn_types::{CallerId, Cid, FundingSource, PinRequest, PinStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{amount_at, conversion_error, Result};

const COLUMNS: &str = "pin_id, cid, subject_id, caller, size_bytes, target_replicas, \
     current_replicas, funding_source, price_charged, charge_id, status, error_code, \
     created_at, updated_at, revision";

/// Write `pin` as the current record for its CID.
///
/// An existing row is replaced only by a newer record (higher pin id) or a
/// newer revision of the same record. Returns whether a row was written.
pub fn upsert(conn: &Connection, pin: &PinRequest) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO pins (pin_id, cid, subject_id, caller, size_bytes, target_replicas,
             current_replicas, funding_source, price_charged, charge_id, status, error_code,
             created_at, updated_at, revision)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(cid) DO UPDATE SET
             pin_id = excluded.pin_id,
             subject_id = excluded.subject_id,
             caller = excluded.caller,
             size_bytes = excluded.size_bytes,
             target_replicas = excluded.target_replicas,
             current_replicas = excluded.current_replicas,
             funding_source = excluded.funding_source,
             price_charged = excluded.price_charged,
             charge_id = excluded.charge_id,
             status = excluded.status,
             error_code = excluded.error_code,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             revision = excluded.revision
         WHERE excluded.pin_id > pins.pin_id
            OR (excluded.pin_id = pins.pin_id AND excluded.revision > pins.revision)",
        params![
            pin.pin_id as i64,
            pin.cid.as_str(),
            pin.subject_id as i64,
            pin.caller.as_str(),
            pin.size_bytes as i64,
            pin.target_replicas,
            pin.current_replicas,
            pin.funding_source.as_str(),
            pin.price_charged.to_string(),
            pin.charge_id,
            pin.status.as_str(),
            pin.error_code,
            pin.created_at as i64,
            pin.updated_at as i64,
            pin.revision as i64,
        ],
    )?;
    Ok(changed > 0)
}

/// Current record for a CID.
pub fn get(conn: &Connection, cid: &Cid) -> Result<Option<PinRequest>> {
    let pin = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM pins WHERE cid = ?1"),
            [cid.as_str()],
            row_to_pin,
        )
        .optional()?;
    Ok(pin)
}

/// Every current record, by pin id.
pub fn list_all(conn: &Connection) -> Result<Vec<PinRequest>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM pins ORDER BY pin_id"))?;
    let rows = stmt
        .query_map([], row_to_pin)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_by_subject(conn: &Connection, subject_id: u64) -> Result<Vec<PinRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM pins WHERE subject_id = ?1 ORDER BY pin_id"
    ))?;
    let rows = stmt
        .query_map([subject_id as i64], row_to_pin)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Move a superseded record into history. Archiving twice is a no-op.
pub fn archive(conn: &Connection, pin: &PinRequest, archived_at: u64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO pin_history (pin_id, cid, subject_id, caller, size_bytes,
             target_replicas, current_replicas, funding_source, price_charged, charge_id,
             status, error_code, created_at, updated_at, revision, archived_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            pin.pin_id as i64,
            pin.cid.as_str(),
            pin.subject_id as i64,
            pin.caller.as_str(),
            pin.size_bytes as i64,
            pin.target_replicas,
            pin.current_replicas,
            pin.funding_source.as_str(),
            pin.price_charged.to_string(),
            pin.charge_id,
            pin.status.as_str(),
            pin.error_code,
            pin.created_at as i64,
            pin.updated_at as i64,
            pin.revision as i64,
            archived_at as i64,
        ],
    )?;
    Ok(())
}

/// Superseded records for a CID, oldest first.
pub fn history(conn: &Connection, cid: &Cid) -> Result<Vec<PinRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM pin_history WHERE cid = ?1 ORDER BY pin_id"
    ))?;
    let rows = stmt
        .query_map([cid.as_str()], row_to_pin)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_history(conn: &Connection) -> Result<Vec<PinRequest>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM pin_history ORDER BY pin_id"))?;
    let rows = stmt
        .query_map([], row_to_pin)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_pin(row: &Row<'_>) -> rusqlite::Result<PinRequest> {
    let cid: String = row.get(1)?;
    let caller: String = row.get(3)?;
    let source: String = row.get(7)?;
    let status: String = row.get(10)?;

    Ok(PinRequest {
        pin_id: row.get::<_, i64>(0)? as u64,
        cid: Cid::new(cid).map_err(|e| conversion_error(1, e.to_string()))?,
        subject_id: row.get::<_, i64>(2)? as u64,
        caller: CallerId::new(caller).map_err(|e| conversion_error(3, e.to_string()))?,
        size_bytes: row.get::<_, i64>(4)? as u64,
        target_replicas: row.get(5)?,
        current_replicas: row.get(6)?,
        funding_source: FundingSource::parse(&source)
            .ok_or_else(|| conversion_error(7, format!("funding source {source:?}")))?,
        price_charged: amount_at(row, 8)?,
        charge_id: row.get(9)?,
        status: PinStatus::parse(&status)
            .ok_or_else(|| conversion_error(10, format!("status {status:?}")))?,
        error_code: row.get(11)?,
        created_at: row.get::<_, i64>(12)? as u64,
        updated_at: row.get::<_, i64>(13)? as u64,
        revision: row.get::<_, i64>(14)? as u64,
    })
}
