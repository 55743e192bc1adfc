//! Pin lifecycle command handlers.

use std::sync::Arc;
use std::time::Duration;

use cairn_pins::{PinSpec, PinSubmitter, PinView, PollConfig};
use cairn_types::Cid;
use serde_json::Value;
use tracing::error;

use super::{
    amount_param, caller_param, cid_param, submitted_json, to_json, u32_param, u64_param,
    Result, WriteThrough,
};
use crate::rpc::RpcError;
use crate::{persist, DaemonState};

/// Create and fund a pin.
pub async fn submit_pin(state: &Arc<DaemonState>, params: &Value) -> Result {
    let spec = PinSpec {
        subject_id: u64_param(params, "subject_id")?,
        caller: caller_param(params)?,
        cid: cid_param(params)?,
        size_bytes: u64_param(params, "size_bytes")?,
        target_replicas: u32_param(params, "target_replicas")?,
        price: amount_param(params, "price")?,
    };
    let db = state.db.lock().await;
    let submitted = WriteThrough::new(state, &db).submit(spec)?;
    Ok(submitted_json(&submitted))
}

/// Charge again for a failed pin.
pub async fn retry_pin(state: &Arc<DaemonState>, params: &Value) -> Result {
    let cid = cid_param(params)?;
    let db = state.db.lock().await;
    let submitted = WriteThrough::new(state, &db).retry(&cid)?;
    Ok(submitted_json(&submitted))
}

/// Current record with derived fields, or null.
pub async fn get_status(state: &Arc<DaemonState>, params: &Value) -> Result {
    let cid = cid_param(params)?;
    match state.status.view(&cid)? {
        Some(view) => to_json(&view),
        None => Ok(Value::Null),
    }
}

pub async fn report_replica(state: &Arc<DaemonState>, params: &Value) -> Result {
    let cid = cid_param(params)?;
    let count = u32_param(params, "current_replicas")?;
    let record = state.registry.report_replica(&cid, count)?;
    write_transition(state, &record).await;
    to_json(&PinView::project(record))
}

pub async fn report_failure(state: &Arc<DaemonState>, params: &Value) -> Result {
    let cid = cid_param(params)?;
    let code = u32_param(params, "error_code")?;
    let record = state.registry.report_failure(&cid, code)?;
    write_transition(state, &record).await;
    to_json(&PinView::project(record))
}

/// Superseded records for a CID, oldest first.
pub async fn pin_history(state: &Arc<DaemonState>, params: &Value) -> Result {
    let cid = cid_param(params)?;
    to_json(&state.registry.history(&cid))
}

pub async fn list_subject_pins(state: &Arc<DaemonState>, params: &Value) -> Result {
    let subject_id = u64_param(params, "subject_id")?;
    let views: Vec<PinView> = state
        .registry
        .list_by_subject(subject_id)
        .into_iter()
        .map(PinView::project)
        .collect();
    to_json(&views)
}

/// Charge audit entries for a CID.
pub async fn list_charges(state: &Arc<DaemonState>, params: &Value) -> Result {
    let cid = cid_param(params)?;
    to_json(&state.registry.charges(&cid))
}

/// Parameters of a `poll_status` stream. Durations are in milliseconds.
pub fn poll_params(params: &Value) -> Result<(Cid, PollConfig)> {
    let cid = cid_param(params)?;
    let defaults = PollConfig::default();
    let millis = |key: &str, default: Duration| -> Result<Duration> {
        match params.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(_) => Ok(Duration::from_millis(u64_param(params, key)?)),
        }
    };

    let interval = millis("interval_ms", defaults.interval)?;
    if interval.is_zero() {
        return Err(RpcError::invalid_params("interval_ms must be positive"));
    }
    let timeout = match params.get("timeout_ms") {
        None | Some(Value::Null) => None,
        Some(_) => Some(Duration::from_millis(u64_param(params, "timeout_ms")?)),
    };
    let stop_when_settled = match params.get("stop_when_settled") {
        None | Some(Value::Null) => defaults.stop_when_settled,
        Some(_) => super::bool_param(params, "stop_when_settled")?,
    };

    Ok((
        cid,
        PollConfig {
            interval,
            max_backoff: millis("max_backoff_ms", defaults.max_backoff)?,
            timeout,
            stop_when_settled,
        },
    ))
}

async fn write_transition(state: &Arc<DaemonState>, record: &cairn_types::PinRequest) {
    let db = state.db.lock().await;
    if let Err(e) = persist::record_transition(&db, record) {
        error!(pin_id = record.pin_id, cid = %record.cid, "write-through failed: {e}");
    }
}
