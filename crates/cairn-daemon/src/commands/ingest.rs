//! Auto-pin command handlers.

use std::sync::Arc;

use cairn_pins::{ContentSaved, IngestOutcome, PinError};
use serde_json::Value;

use super::{
    amount_param, bool_param, caller_param, cid_param, submitted_json, u32_param, u64_param,
    Result, WriteThrough,
};
use crate::rpc::RpcError;
use crate::{persist, DaemonState};

/// Content-saved notification from the upload pipeline.
pub async fn content_saved(state: &Arc<DaemonState>, params: &Value) -> Result {
    let event = ContentSaved {
        subject_id: u64_param(params, "subject_id")?,
        caller: caller_param(params)?,
        cid: cid_param(params)?,
        size_bytes: u64_param(params, "size_bytes")?,
        target_replicas: u32_param(params, "target_replicas")?,
        price: amount_param(params, "price")?,
    };

    let db = state.db.lock().await;
    let outcome = state.ingestor.on_content_saved(event, &WriteThrough::new(state, &db));
    drop(db);
    let mut result = serde_json::json!({"outcome": outcome.as_str()});
    match outcome {
        IngestOutcome::Forwarded(Ok(submitted)) => {
            result["pin"] = submitted_json(&submitted);
        }
        IngestOutcome::Forwarded(Err(err)) => {
            result["error"] = rejection(err);
        }
        IngestOutcome::Duplicate | IngestOutcome::Disabled => {}
    }
    Ok(result)
}

pub async fn set_auto_pin(state: &Arc<DaemonState>, params: &Value) -> Result {
    let enabled = bool_param(params, "enabled")?;
    state.ingestor.set_enabled(enabled);
    let db = state.db.lock().await;
    persist::record_auto_pin(&db, enabled)?;
    Ok(serde_json::json!({"enabled": enabled}))
}

pub async fn get_auto_pin(state: &Arc<DaemonState>) -> Result {
    Ok(serde_json::json!({"enabled": state.ingestor.is_enabled()}))
}

fn rejection(err: PinError) -> Value {
    let err = RpcError::from(err);
    serde_json::json!({
        "code": err.code,
        "message": err.message,
        "data": err.data,
    })
}
