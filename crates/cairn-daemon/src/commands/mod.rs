//! IPC command handlers, one submodule per RPC category.

pub mod billing;
pub mod ingest;
pub mod pins;

use cairn_pins::{PinError, PinSpec, PinSubmitter, Submitted};
use cairn_types::{Balance, CallerId, Cid};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::rpc::RpcError;
use crate::{persist, DaemonState};

type Result<T = Value> = std::result::Result<T, RpcError>;
type PinResult<T> = std::result::Result<T, PinError>;

fn required<'a>(params: &'a Value, key: &str) -> Result<&'a Value> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    required(params, key)?
        .as_str()
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be a string")))
}

fn u64_param(params: &Value, key: &str) -> Result<u64> {
    required(params, key)?
        .as_u64()
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be an unsigned integer")))
}

fn u32_param(params: &Value, key: &str) -> Result<u32> {
    u32::try_from(u64_param(params, key)?)
        .map_err(|_| RpcError::invalid_params(&format!("{key} out of range")))
}

fn bool_param(params: &Value, key: &str) -> Result<bool> {
    required(params, key)?
        .as_bool()
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be a boolean")))
}

/// Amounts may be sent as decimal strings to carry the full `u128` range.
fn amount_param(params: &Value, key: &str) -> Result<Balance> {
    match required(params, key)? {
        Value::String(s) => s
            .parse()
            .map_err(|_| RpcError::invalid_params(&format!("{key} must be a decimal amount"))),
        v => v
            .as_u64()
            .map(Balance::from)
            .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be an unsigned amount"))),
    }
}

fn cid_param(params: &Value) -> Result<Cid> {
    Cid::new(str_param(params, "cid")?).map_err(|e| PinError::InvalidCid(e).into())
}

fn caller_param(params: &Value) -> Result<CallerId> {
    CallerId::new(str_param(params, "caller")?)
        .map_err(|e| RpcError::invalid_params(&format!("caller: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&format!("encode: {e}")))
}

/// Submitter that commits each new record, its charge and its debit to the
/// database before the record becomes visible.
///
/// Holds a borrowed connection, so it must not live across an `.await`.
struct WriteThrough<'a> {
    state: &'a DaemonState,
    conn: &'a Connection,
}

impl<'a> WriteThrough<'a> {
    fn new(state: &'a DaemonState, conn: &'a Connection) -> Self {
        Self { state, conn }
    }

    fn retry(&self, cid: &Cid) -> PinResult<Submitted> {
        self.state.registry.retry_with(cid, |s| self.commit(s))
    }

    fn commit(&self, submitted: &Submitted) -> cairn_db::Result<()> {
        let quota = self.state.registry.resolver().quota().current_cycle();
        let cycle_total = match submitted.charge.cycle_id {
            Some(id) if id == quota.cycle_id => quota.total,
            _ => self.state.config.quota_total(),
        };
        persist::record_submission(self.conn, submitted, cycle_total)
    }
}

impl PinSubmitter for WriteThrough<'_> {
    fn submit(&self, spec: PinSpec) -> PinResult<Submitted> {
        self.state.registry.submit_with(spec, |s| self.commit(s))
    }
}

fn submitted_json(submitted: &Submitted) -> Value {
    serde_json::json!({
        "pin_id": submitted.record.pin_id,
        "cid": submitted.record.cid,
        "status": submitted.record.status,
        "funding_source": submitted.record.funding_source,
        "price_charged": submitted.record.price_charged.to_string(),
        "charge_id": submitted.record.charge_id,
        "superseded_pin_id": submitted.superseded.as_ref().map(|r| r.pin_id),
    })
}
