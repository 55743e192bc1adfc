//! Charge audit log. One row per debit, never updated.

use cairn_types::{CallerId, Charge, Cid, FundingSource, Payer};
use rusqlite::{params, Connection, Row};

use crate::{amount_at, conversion_error, Result};

pub fn insert(conn: &Connection, charge: &Charge) -> Result<()> {
    conn.execute(
        "INSERT INTO charges (charge_id, pin_id, cid, source, payer_key, amount, cycle_id, charged_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            charge.charge_id,
            charge.pin_id as i64,
            charge.cid.as_str(),
            charge.source().as_str(),
            charge.payer.account_key(),
            charge.amount.to_string(),
            charge.cycle_id,
            charge.charged_at as i64,
        ],
    )?;
    Ok(())
}

pub fn for_cid(conn: &Connection, cid: &Cid) -> Result<Vec<Charge>> {
    let mut stmt = conn.prepare(
        "SELECT charge_id, pin_id, cid, source, payer_key, amount, cycle_id, charged_at
         FROM charges WHERE cid = ?1 ORDER BY pin_id",
    )?;
    let rows = stmt
        .query_map([cid.as_str()], row_to_charge)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_all(conn: &Connection) -> Result<Vec<Charge>> {
    let mut stmt = conn.prepare(
        "SELECT charge_id, pin_id, cid, source, payer_key, amount, cycle_id, charged_at
         FROM charges ORDER BY pin_id",
    )?;
    let rows = stmt
        .query_map([], row_to_charge)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_charge(row: &Row<'_>) -> rusqlite::Result<Charge> {
    let cid: String = row.get(2)?;
    let source: String = row.get(3)?;
    let key: String = row.get(4)?;

    let payer = match FundingSource::parse(&source) {
        Some(FundingSource::Pool) => Payer::Pool,
        Some(FundingSource::SubjectAccount) => Payer::Subject(
            key.parse()
                .map_err(|e| conversion_error(4, format!("subject {key:?}: {e}")))?,
        ),
        Some(FundingSource::CallerAccount) => {
            Payer::Caller(CallerId::new(key).map_err(|e| conversion_error(4, e.to_string()))?)
        }
        None => return Err(conversion_error(3, format!("funding source {source:?}"))),
    };

    Ok(Charge {
        charge_id: row.get(0)?,
        pin_id: row.get::<_, i64>(1)? as u64,
        cid: Cid::new(cid).map_err(|e| conversion_error(2, e.to_string()))?,
        payer,
        amount: amount_at(row, 5)?,
        cycle_id: row.get(6)?,
        charged_at: row.get::<_, i64>(7)? as u64,
    })
}
