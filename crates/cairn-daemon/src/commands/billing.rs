//! Billing command handlers.

use std::sync::Arc;

use cairn_types::CallerId;
use serde_json::Value;

use super::{amount_param, str_param, u64_param, Result};
use crate::persist::{self, CreditTarget};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Current quota cycle and pool balance.
pub async fn quota_snapshot(state: &Arc<DaemonState>) -> Result {
    let snapshot = state.registry.resolver().quota().snapshot();
    Ok(serde_json::json!({
        "cycle_id": snapshot.cycle.cycle_id,
        "total": snapshot.cycle.total.to_string(),
        "used": snapshot.cycle.used.to_string(),
        "remaining": snapshot.remaining.to_string(),
        "pool_balance": snapshot.pool_balance.to_string(),
        "resets_at": snapshot.resets_at,
    }))
}

/// Pool balance plus the requested subject and caller balances.
pub async fn get_balances(state: &Arc<DaemonState>, params: &Value) -> Result {
    let resolver = state.registry.resolver();
    let mut result = serde_json::json!({
        "pool": resolver.quota().pool_balance().to_string(),
    });

    if params.get("subject_id").is_some_and(|v| !v.is_null()) {
        let subject_id = u64_param(params, "subject_id")?;
        result["subject"] = serde_json::json!({
            "subject_id": subject_id,
            "balance": resolver.accounts().subject_balance(subject_id).to_string(),
        });
    }
    if let Some(raw) = params.get("caller").and_then(Value::as_str) {
        let caller = CallerId::new(raw).map_err(|e| RpcError::invalid_params(&format!("caller: {e}")))?;
        result["caller"] = serde_json::json!({
            "caller": caller.as_str(),
            "balance": resolver.accounts().caller_balance(&caller).to_string(),
        });
    }
    Ok(result)
}

/// Credit an account. Called by the fee-routing collaborator.
///
/// `kind` is `"pool"`, `"subject"` or `"caller"`; `key` names the account
/// for the latter two.
pub async fn credit_account(state: &Arc<DaemonState>, params: &Value) -> Result {
    let amount = amount_param(params, "amount")?;
    if amount == 0 {
        return Err(RpcError::invalid_params("amount must be positive"));
    }
    let target = match str_param(params, "kind")? {
        "pool" => CreditTarget::Pool,
        "subject" => CreditTarget::Subject(
            str_param(params, "key")?
                .parse()
                .map_err(|_| RpcError::invalid_params("key must be a subject id"))?,
        ),
        "caller" => CreditTarget::Caller(
            CallerId::new(str_param(params, "key")?)
                .map_err(|e| RpcError::invalid_params(&format!("key: {e}")))?,
        ),
        other => return Err(RpcError::invalid_params(&format!("unknown account kind {other:?}"))),
    };

    // The row commits first so a failed write never leaves spendable funds.
    let db = state.db.lock().await;
    let now = state.now();
    persist::record_credit(&db, &target, amount, now)?;

    let resolver = state.registry.resolver();
    let applied = match &target {
        CreditTarget::Pool => resolver.quota().credit_pool(amount),
        CreditTarget::Subject(id) => resolver.accounts().credit_subject(*id, amount),
        CreditTarget::Caller(caller) => resolver.accounts().credit_caller(caller, amount),
    };
    let balance = match applied {
        Ok(balance) => balance,
        Err(e) => {
            if let Err(revert) = persist::revert_credit(&db, &target, amount, now) {
                tracing::error!(?target, %amount, "credit revert failed: {revert}");
            }
            return Err(RpcError::invalid_params(&e.to_string()));
        }
    };
    tracing::info!(?target, %amount, %balance, "account credited");

    Ok(serde_json::json!({"balance": balance.to_string()}))
}
