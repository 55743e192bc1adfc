//! Integration tests for the pin lifecycle and billing cascade.
//!
//! The library holds shared fixtures; the tests live under `tests/`:
//!
//! - `billing_cascade` drives the registry directly through the funding
//!   cascade, the pin state machine and auto-pin ingestion
//! - `daemon_rpc` goes through JSON-RPC dispatch against a real database
//! - `restart` checks that state survives a daemon restart
//!
//! ```sh
//! cargo test -p cairn-integration-tests
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use cairn_billing::quota::cycle_for;
use cairn_billing::{AccountBook, FundingResolver, QuotaLedger};
use cairn_daemon::config::DaemonConfig;
use cairn_daemon::rpc::{dispatch_request, RpcRequest, RpcResponse};
use cairn_daemon::DaemonState;
use cairn_pins::{EventBus, PinRegistry, RegistryConfig};
use cairn_types::{Balance, CallerId, Cid, Clock, QuotaCycle};
use serde_json::Value;
use tempfile::TempDir;

pub use cairn_types::ManualClock;

/// 2024-03-15T00:00:00Z.
pub const MID_MARCH_2024: u64 = 1_710_460_800;
/// 2024-04-01T00:00:00Z.
pub const APRIL_2024: u64 = 1_711_929_600;

pub fn cid(raw: &str) -> Cid {
    Cid::new(raw).expect("valid cid")
}

pub fn caller(raw: &str) -> CallerId {
    CallerId::new(raw).expect("valid caller")
}

/// Funding state for a registry fixture.
#[derive(Debug, Clone, Copy)]
pub struct Funding {
    pub quota_total: Balance,
    pub quota_used: Balance,
    pub pool_balance: Balance,
}

impl Default for Funding {
    fn default() -> Self {
        Self {
            quota_total: 1_000,
            quota_used: 0,
            pool_balance: 1_000,
        }
    }
}

/// A registry over fresh in-memory ledgers.
pub fn registry(funding: Funding, clock: &ManualClock) -> PinRegistry {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let cycle = QuotaCycle {
        cycle_id: cycle_for(clock.now_secs()),
        total: funding.quota_total,
        used: funding.quota_used,
    };
    let quota = QuotaLedger::restore(cycle, funding.pool_balance, funding.quota_total, clock.clone());
    let resolver = FundingResolver::new(Arc::new(quota), Arc::new(AccountBook::new()));
    PinRegistry::new(resolver, RegistryConfig::default(), clock, EventBus::new(64))
}

/// Daemon configuration with a small quota, for readable numbers.
pub fn config(quota_total: u64, pool: u64) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.billing.monthly_quota_total = quota_total;
    config.billing.initial_pool_balance = pool;
    config
}

/// Daemon state over an on-disk database in a temporary directory.
pub struct TestDaemon {
    pub state: Arc<DaemonState>,
    pub clock: ManualClock,
    dir: TempDir,
}

impl TestDaemon {
    pub fn start(config: DaemonConfig, clock: ManualClock) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let state = Self::bootstrap(&dir, config, &clock);
        Self { state, clock, dir }
    }

    /// Drop the in-memory state and rebuild it from the database.
    pub fn restart(self, config: DaemonConfig) -> Self {
        let Self { state, clock, dir } = self;
        drop(state);
        let state = Self::bootstrap(&dir, config, &clock);
        Self { state, clock, dir }
    }

    pub fn db_path(&self) -> PathBuf {
        db_path(&self.dir)
    }

    /// Dispatch one JSON-RPC request.
    pub async fn call(&self, method: &str, params: Value) -> RpcResponse {
        let request = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: serde_json::json!(1),
            method: method.to_string(),
            params,
        };
        dispatch_request(self.state.clone(), request).await
    }

    /// Dispatch and return the result, failing the test on an error.
    pub async fn ok(&self, method: &str, params: Value) -> Value {
        let response = self.call(method, params).await;
        if let Some(err) = response.error {
            panic!("{method} failed: {} {}", err.code, err.message);
        }
        response.result.unwrap_or(Value::Null)
    }

    /// Dispatch and return the error code, failing the test on success.
    pub async fn err_code(&self, method: &str, params: Value) -> i32 {
        match self.call(method, params).await.error {
            Some(err) => err.code,
            None => panic!("{method} unexpectedly succeeded"),
        }
    }

    fn bootstrap(dir: &TempDir, config: DaemonConfig, clock: &ManualClock) -> Arc<DaemonState> {
        let conn = cairn_db::open(&db_path(dir)).expect("open db");
        let state = DaemonState::bootstrap(config, conn, Arc::new(clock.clone())).expect("bootstrap");
        Arc::new(state)
    }
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("cairn.db")
}
