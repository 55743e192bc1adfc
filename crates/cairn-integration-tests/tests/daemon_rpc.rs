//! Integration test: JSON-RPC dispatch over a real database.
//!
//! Exercises every method the daemon exposes, the error code mapping and
//! status polling through the daemon's projection.

use std::time::Duration;

use cairn_integration_tests::{cid, config, ManualClock, TestDaemon, APRIL_2024, MID_MARCH_2024};
use cairn_pins::{PollConfig, PollEvent};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn daemon(quota_total: u64, pool: u64) -> TestDaemon {
    TestDaemon::start(config(quota_total, pool), ManualClock::new(MID_MARCH_2024))
}

fn pin(cid: &str, replicas: u32, price: u64) -> serde_json::Value {
    json!({
        "subject_id": 7,
        "caller": "0xalice",
        "cid": cid,
        "size_bytes": 10,
        "target_replicas": replicas,
        "price": price,
    })
}

#[tokio::test]
async fn submit_and_converge() {
    let d = daemon(100, 1_000);
    let submitted = d.ok("submit_pin", pin("Qm1", 3, 5)).await;
    assert_eq!(submitted["funding_source"], "pool");
    assert_eq!(submitted["price_charged"], "5");
    assert_eq!(submitted["status"], "pending");

    let status = d.ok("get_status", json!({"cid": "Qm1"})).await;
    assert_eq!(status["status"], "pending");
    assert_eq!(status["converged"], false);

    let active = d.ok("report_replica", json!({"cid": "Qm1", "current_replicas": 1})).await;
    assert_eq!(active["status"], "active");
    assert_eq!(active["current_replicas"], 1);

    let full = d.ok("report_replica", json!({"cid": "Qm1", "current_replicas": 3})).await;
    assert_eq!(full["status"], "active");
    assert_eq!(full["converged"], true);

    let charges = d.ok("list_charges", json!({"cid": "Qm1"})).await;
    assert_eq!(charges.as_array().map(Vec::len), Some(1));
    assert_eq!(charges[0]["charge_id"], submitted["charge_id"]);
}

#[tokio::test]
async fn failure_decodes_and_retry_recharges() {
    let d = daemon(100, 1_000);
    let first = d.ok("submit_pin", pin("Qm2", 1, 5)).await;

    let failed = d.ok("report_failure", json!({"cid": "Qm2", "error_code": 3})).await;
    assert_eq!(failed["status"], "failed");
    assert_eq!(failed["error_code"], 3);
    assert_eq!(failed["failure"]["kind"], "replication_timeout");
    assert_eq!(failed["failure"]["remedy"], "retry_later");

    let retried = d.ok("retry_pin", json!({"cid": "Qm2"})).await;
    assert_eq!(retried["status"], "pending");
    assert_eq!(retried["superseded_pin_id"], first["pin_id"]);
    assert_ne!(retried["charge_id"], first["charge_id"]);

    let history = d.ok("pin_history", json!({"cid": "Qm2"})).await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    assert_eq!(history[0]["status"], "failed");

    let quota = d.ok("quota_snapshot", json!({})).await;
    assert_eq!(quota["used"], "10");
    assert_eq!(quota["remaining"], "90");
    assert_eq!(quota["pool_balance"], "990");
}

#[tokio::test]
async fn subject_account_pays_when_quota_is_short() {
    let d = daemon(100, 1_000);
    d.ok("submit_pin", pin("bafyFill", 1, 90)).await;
    d.ok("credit_account", json!({"kind": "subject", "key": "7", "amount": "50"})).await;

    let submitted = d.ok("submit_pin", pin("bafyA", 1, 20)).await;
    assert_eq!(submitted["funding_source"], "subject_account");

    let balances = d
        .ok("get_balances", json!({"subject_id": 7, "caller": "0xalice"}))
        .await;
    assert_eq!(balances["pool"], "910");
    assert_eq!(balances["subject"]["balance"], "30");
    assert_eq!(balances["caller"]["balance"], "0");
    assert_eq!(d.ok("quota_snapshot", json!({})).await["used"], "90");
}

#[tokio::test]
async fn error_codes() {
    let d = daemon(10, 1_000);
    assert_eq!(d.err_code("submit_pin", pin("bad cid", 1, 5)).await, -32020);
    assert_eq!(
        d.err_code("submit_pin", json!({"subject_id": 7, "caller": "0xalice", "cid": "bafyZ", "size_bytes": 0, "target_replicas": 1, "price": 5})).await,
        -32021
    );
    assert_eq!(d.err_code("submit_pin", pin("bafyZ", 0, 5)).await, -32022);
    assert_eq!(d.err_code("submit_pin", pin("bafyZ", 1, 0)).await, -32023);
    assert_eq!(d.err_code("submit_pin", pin("bafyZ", 1, 50)).await, -32040);

    d.ok("submit_pin", pin("bafyZ", 1, 5)).await;
    assert_eq!(d.err_code("submit_pin", pin("bafyZ", 1, 5)).await, -32025);
    assert_eq!(d.err_code("retry_pin", json!({"cid": "bafyZ"})).await, -32031);
    assert_eq!(
        d.err_code("report_replica", json!({"cid": "bafyNone", "current_replicas": 1})).await,
        -32030
    );
    assert_eq!(d.err_code("submit_pin", json!({"cid": "bafyZ"})).await, -32602);
    assert_eq!(d.err_code("no_such_method", json!({})).await, -32601);

    assert_eq!(d.ok("get_status", json!({"cid": "bafyNone"})).await, serde_json::Value::Null);
}

#[tokio::test]
async fn content_saved_dedup_and_toggle() {
    let d = daemon(100, 1_000);
    let saved = pin("Qm3", 1, 5);

    let first = d.ok("content_saved", saved.clone()).await;
    assert_eq!(first["outcome"], "submitted");
    assert_eq!(first["pin"]["cid"], "Qm3");
    assert_eq!(d.ok("content_saved", saved).await["outcome"], "duplicate");
    assert_eq!(
        d.ok("list_charges", json!({"cid": "Qm3"})).await.as_array().map(Vec::len),
        Some(1)
    );

    d.ok("set_auto_pin", json!({"enabled": false})).await;
    assert_eq!(d.ok("get_auto_pin", json!({})).await["enabled"], false);
    assert_eq!(d.ok("content_saved", pin("Qm4", 1, 5)).await["outcome"], "disabled");
    assert_eq!(d.ok("get_status", json!({"cid": "Qm4"})).await, serde_json::Value::Null);
}

/// Drop a table under the running daemon so the next write to it fails.
async fn drop_table(d: &TestDaemon, table: &str) {
    d.state
        .db
        .lock()
        .await
        .execute_batch(&format!("DROP TABLE {table}"))
        .expect("drop table");
}

#[tokio::test]
async fn failed_submission_write_leaves_nothing_behind() {
    let d = daemon(100, 1_000);
    drop_table(&d, "charges").await;

    assert_eq!(d.err_code("submit_pin", pin("bafyW", 1, 5)).await, -32603);
    assert_eq!(d.ok("get_status", json!({"cid": "bafyW"})).await, serde_json::Value::Null);
    let quota = d.ok("quota_snapshot", json!({})).await;
    assert_eq!(quota["used"], "0");
    assert_eq!(quota["pool_balance"], "1000");

    // Not remembered as forwarded, so a redelivery is tried again.
    for _ in 0..2 {
        let outcome = d.ok("content_saved", pin("bafyW", 1, 5)).await;
        assert_eq!(outcome["outcome"], "rejected");
        assert_eq!(outcome["error"]["code"], -32603);
    }
    assert_eq!(d.ok("quota_snapshot", json!({})).await["used"], "0");
}

#[tokio::test]
async fn failed_credit_write_is_not_spendable() {
    let d = daemon(1, 0);
    drop_table(&d, "subject_accounts").await;

    let credit = json!({"kind": "subject", "key": "7", "amount": "50"});
    assert_eq!(d.err_code("credit_account", credit.clone()).await, -32603);
    assert_eq!(d.err_code("credit_account", credit).await, -32603);

    let balances = d.ok("get_balances", json!({"subject_id": 7})).await;
    assert_eq!(balances["subject"]["balance"], "0");
    assert_eq!(d.err_code("submit_pin", pin("bafyC", 1, 5)).await, -32040);
}

#[tokio::test]
async fn get_balances_rejects_malformed_subject() {
    let d = daemon(100, 1_000);
    assert_eq!(d.err_code("get_balances", json!({"subject_id": "7"})).await, -32602);
    assert_eq!(d.err_code("get_balances", json!({"subject_id": -1})).await, -32602);

    let balances = d.ok("get_balances", json!({"subject_id": null})).await;
    assert_eq!(balances["pool"], "1000");
    assert!(balances.get("subject").is_none());
}

#[tokio::test]
async fn content_saved_rejection_is_reported() {
    let d = daemon(1, 0);
    let outcome = d.ok("content_saved", pin("Qm5", 1, 5)).await;
    assert_eq!(outcome["outcome"], "rejected");
    assert_eq!(outcome["error"]["code"], -32040);
}

#[tokio::test]
async fn list_subject_pins_filters_by_subject() {
    let d = daemon(100, 1_000);
    d.ok("submit_pin", pin("bafy1", 1, 1)).await;
    d.ok("submit_pin", pin("bafy2", 1, 1)).await;
    let mut other = pin("bafy3", 1, 1);
    other["subject_id"] = json!(8);
    d.ok("submit_pin", other).await;

    let pins = d.ok("list_subject_pins", json!({"subject_id": 7})).await;
    let cids: Vec<_> = pins
        .as_array()
        .map(|a| a.iter().filter_map(|p| p["cid"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(cids.len(), 2);
    assert!(cids.contains(&"bafy1") && cids.contains(&"bafy2"));
}

#[tokio::test]
async fn quota_rolls_over_at_month_boundary() {
    let d = daemon(100, 1_000);
    d.ok("submit_pin", pin("bafyMarch", 1, 100)).await;
    assert_eq!(d.err_code("submit_pin", pin("bafyLate", 1, 1)).await, -32040);

    d.clock.set(APRIL_2024);
    let submitted = d.ok("submit_pin", pin("bafyLate", 1, 1)).await;
    assert_eq!(submitted["funding_source"], "pool");

    let quota = d.ok("quota_snapshot", json!({})).await;
    assert_eq!(quota["used"], "1");
    assert_eq!(quota["pool_balance"], "899");
}

#[tokio::test(start_paused = true)]
async fn poll_streams_until_converged() {
    let d = daemon(100, 1_000);
    d.ok("submit_pin", pin("bafyPoll", 2, 5)).await;

    let config = PollConfig {
        interval: Duration::from_secs(1),
        ..PollConfig::default()
    };
    let mut handle = d
        .state
        .status
        .poll_status(cid("bafyPoll"), config, CancellationToken::new());

    match handle.next().await {
        Some(PollEvent::Snapshot(view)) => assert!(!view.converged),
        other => panic!("unexpected {other:?}"),
    }

    d.ok("report_replica", json!({"cid": "bafyPoll", "current_replicas": 2})).await;
    loop {
        match handle.next().await {
            Some(PollEvent::Snapshot(view)) if view.converged => break,
            Some(PollEvent::Snapshot(_)) => continue,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(handle.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn poll_cancel_ends_stream() {
    let d = daemon(100, 1_000);
    let token = CancellationToken::new();
    let mut handle = d
        .state
        .status
        .poll_status(cid("bafyAbsent"), PollConfig::default(), token.clone());

    assert!(matches!(handle.next().await, Some(PollEvent::Missing)));
    token.cancel();
    loop {
        match handle.next().await {
            Some(PollEvent::Cancelled) => break,
            Some(PollEvent::Missing) => continue,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(handle.next().await.is_none());
}
