use std::sync::Arc;

use cairn_daemon::config::DaemonConfig;
use cairn_daemon::rpc::RpcServer;
use cairn_daemon::DaemonState;
use cairn_types::SystemClock;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("cairn={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "cairn daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let conn = cairn_db::open(&data_dir.join("cairn.db"))?;
    let state = Arc::new(DaemonState::bootstrap(config, conn, Arc::new(SystemClock))?);

    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {e}");
            }
        }
        _ = shutdown_rx.recv() => {
            info!("shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    info!("daemon stopped");
    Ok(())
}
