//! Integration test: daemon state survives a restart.
//!
//! Every mutating RPC writes through to SQLite; a fresh daemon over the same
//! file must see the same pins, history, charges, balances and quota.

use cairn_db::queries::{charges, pins};
use cairn_integration_tests::{cid, config, ManualClock, TestDaemon, APRIL_2024, MID_MARCH_2024};
use serde_json::json;

fn pin(cid: &str, price: u64) -> serde_json::Value {
    json!({
        "subject_id": 7,
        "caller": "0xalice",
        "cid": cid,
        "size_bytes": 10,
        "target_replicas": 2,
        "price": price,
    })
}

#[tokio::test]
async fn pins_and_ledgers_survive_restart() {
    let d = TestDaemon::start(config(100, 1_000), ManualClock::new(MID_MARCH_2024));
    d.ok("credit_account", json!({"kind": "caller", "key": "0xalice", "amount": 40})).await;
    d.ok("submit_pin", pin("bafyA", 100)).await;
    let by_caller = d.ok("submit_pin", pin("bafyB", 15)).await;
    assert_eq!(by_caller["funding_source"], "caller_account");
    d.ok("report_replica", json!({"cid": "bafyA", "current_replicas": 2})).await;
    d.ok("set_auto_pin", json!({"enabled": false})).await;

    let d = d.restart(config(100, 1_000));
    let status = d.ok("get_status", json!({"cid": "bafyA"})).await;
    assert_eq!(status["status"], "active");
    assert_eq!(status["converged"], true);
    assert_eq!(d.ok("get_status", json!({"cid": "bafyB"})).await["status"], "pending");

    let balances = d.ok("get_balances", json!({"caller": "0xalice"})).await;
    assert_eq!(balances["pool"], "900");
    assert_eq!(balances["caller"]["balance"], "25");

    let quota = d.ok("quota_snapshot", json!({})).await;
    assert_eq!(quota["used"], "100");
    assert_eq!(d.ok("get_auto_pin", json!({})).await["enabled"], false);

    let charges = d.ok("list_charges", json!({"cid": "bafyB"})).await;
    assert_eq!(charges[0]["charge_id"], by_caller["charge_id"]);

    // Already pending after restart.
    assert_eq!(d.err_code("submit_pin", pin("bafyB", 15)).await, -32025);
}

#[tokio::test]
async fn retry_history_and_ids_survive_restart() {
    let d = TestDaemon::start(config(100, 1_000), ManualClock::new(MID_MARCH_2024));
    let first = d.ok("submit_pin", pin("bafyR", 5)).await;
    d.ok("report_failure", json!({"cid": "bafyR", "error_code": 1})).await;
    let retried = d.ok("retry_pin", json!({"cid": "bafyR"})).await;

    let d = d.restart(config(100, 1_000));
    let history = d.ok("pin_history", json!({"cid": "bafyR"})).await;
    assert_eq!(history[0]["pin_id"], first["pin_id"]);
    assert_eq!(history[0]["error_code"], 1);
    assert_eq!(
        d.ok("get_status", json!({"cid": "bafyR"})).await["pin_id"],
        retried["pin_id"]
    );
    assert_eq!(
        d.ok("list_charges", json!({"cid": "bafyR"})).await.as_array().map(Vec::len),
        Some(2)
    );

    let next = d.ok("submit_pin", pin("bafyNext", 5)).await;
    assert!(next["pin_id"].as_u64() > retried["pin_id"].as_u64());
}

#[tokio::test]
async fn stored_cycle_rolls_over_after_restart() {
    let d = TestDaemon::start(config(100, 1_000), ManualClock::new(MID_MARCH_2024));
    d.ok("submit_pin", pin("bafyMarch", 80)).await;

    d.clock.set(APRIL_2024);
    let d = d.restart(config(200, 1_000));
    let quota = d.ok("quota_snapshot", json!({})).await;
    assert_eq!(quota["used"], "0");
    assert_eq!(quota["total"], "200");

    let submitted = d.ok("submit_pin", pin("bafyApril", 150)).await;
    assert_eq!(submitted["funding_source"], "pool");
}

#[tokio::test]
async fn rows_on_disk_match_memory() {
    let d = TestDaemon::start(config(100, 1_000), ManualClock::new(MID_MARCH_2024));
    d.ok("submit_pin", pin("bafyDisk", 5)).await;
    d.ok("report_replica", json!({"cid": "bafyDisk", "current_replicas": 1})).await;

    let conn = cairn_db::open(&d.db_path()).expect("open");
    let stored = pins::get(&conn, &cid("bafyDisk")).expect("query").expect("row");
    assert_eq!(Some(stored), d.state.registry.get(&cid("bafyDisk")));
    assert_eq!(
        charges::for_cid(&conn, &cid("bafyDisk")).expect("query"),
        d.state.registry.charges(&cid("bafyDisk"))
    );
}
