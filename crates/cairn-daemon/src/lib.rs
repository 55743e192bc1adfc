//! cairn-daemon: pin lifecycle and billing service.
//!
//! Single process running a Tokio runtime. Clients talk JSON-RPC 2.0 over a
//! Unix socket, one request per line. The pin registry and ledgers live in
//! memory; submissions and credits commit to SQLite before they take
//! effect, other transitions write through after.

pub mod commands;
pub mod config;
pub mod persist;
pub mod rpc;

use std::sync::Arc;

use cairn_pins::{AutoPinIngestor, EventBus, PinRegistry, StatusProjection};
use cairn_types::Clock;
use rusqlite::Connection;
use tokio::sync::{broadcast, Mutex};

use crate::config::DaemonConfig;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Database connection. Holding the lock serializes write-through.
    pub db: Arc<Mutex<Connection>>,
    pub config: DaemonConfig,
    pub registry: Arc<PinRegistry>,
    pub ingestor: AutoPinIngestor,
    pub status: StatusProjection<PinRegistry>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl DaemonState {
    /// Rebuild in-memory state from `conn` and wire up the components.
    pub fn bootstrap(
        config: DaemonConfig,
        conn: Connection,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let events = EventBus::new(config.advanced.event_buffer);
        let loaded = persist::load(&conn, &config, clock.clone(), events.clone())?;
        let registry = Arc::new(loaded.registry);

        let mut ingest = config.ingest_config();
        ingest.enabled = loaded.auto_pin_enabled;
        let ingestor = AutoPinIngestor::new(ingest, clock.clone());
        let status = StatusProjection::new(registry.clone());
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            config,
            registry,
            ingestor,
            status,
            events,
            clock,
            shutdown_tx,
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now_secs()
    }
}
