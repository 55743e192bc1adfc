//! JSON-RPC server over a Unix socket.
//!
//! One request per line, one response per line. Two methods switch the
//! connection into streaming mode after their acknowledgement:
//! `subscribe_events` pushes `pin_event` notifications and `poll_status`
//! pushes `poll_event` notifications. Closing the connection ends the
//! stream and cancels the poll.

use std::path::PathBuf;
use std::sync::Arc;

use cairn_db::DbError;
use cairn_pins::{EventFilter, PinError, StatusError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, "METHOD_NOT_FOUND", Some(serde_json::json!({"method": method})))
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(-32602, "INVALID_PARAMS", Some(serde_json::json!({"detail": detail})))
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(-32603, "INTERNAL_ERROR", Some(serde_json::json!({"detail": detail})))
    }
}

impl From<PinError> for RpcError {
    fn from(err: PinError) -> Self {
        let detail = err.to_string();
        let (code, name, data) = match &err {
            PinError::InvalidCid(_) => (-32020, "INVALID_CID", serde_json::json!({"detail": detail})),
            PinError::InvalidSize => (-32021, "INVALID_SIZE", serde_json::json!({"detail": detail})),
            PinError::SizeTooLarge { size, max } => {
                (-32024, "SIZE_TOO_LARGE", serde_json::json!({"size": size, "max": max}))
            }
            PinError::InvalidReplicaCount { requested, max } => (
                -32022,
                "INVALID_REPLICA_COUNT",
                serde_json::json!({"requested": requested, "max": max}),
            ),
            PinError::InvalidPrice => (-32023, "INVALID_PRICE", serde_json::json!({"detail": detail})),
            PinError::AlreadyPending { cid } => {
                (-32025, "ALREADY_PENDING", serde_json::json!({"cid": cid}))
            }
            PinError::InsufficientFunds { amount } => (
                -32040,
                "INSUFFICIENT_FUNDS",
                serde_json::json!({"required": amount.to_string()}),
            ),
            PinError::NotFound { cid } => (-32030, "NOT_FOUND", serde_json::json!({"cid": cid})),
            PinError::InvalidTransition { cid, from, operation } => (
                -32031,
                "INVALID_TRANSITION",
                serde_json::json!({"cid": cid, "status": from, "operation": operation}),
            ),
            PinError::CommitFailed(_) => (-32603, "INTERNAL_ERROR", serde_json::json!({"detail": detail})),
        };
        Self::new(code, name, Some(data))
    }
}

impl From<StatusError> for RpcError {
    fn from(err: StatusError) -> Self {
        Self::internal_error(&err.to_string())
    }
}

impl From<DbError> for RpcError {
    fn from(err: DbError) -> Self {
        Self::internal_error(&format!("db error: {err}"))
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Accept connections until the task is dropped.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = ?self.socket_path, "IPC server listening");

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {e}");
                }
            }
        }
    }
}

async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break; // EOF
        }

        let request = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => request,
            Err(_) => {
                write_line(&mut writer, &RpcResponse::error(Value::Null, RpcError::parse_error()))
                    .await?;
                continue;
            }
        };

        match request.method.as_str() {
            "subscribe_events" => return stream_events(&state, request, reader, writer).await,
            "poll_status" => return stream_poll(&state, request, reader, writer).await,
            _ => {
                let response = dispatch_request(state.clone(), request).await;
                write_line(&mut writer, &response).await?;
            }
        }
    }

    Ok(())
}

/// Dispatch a request to its command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();
    let params = &request.params;

    debug!(method, "dispatching RPC");

    let result = match method {
        // Pins
        "submit_pin" => commands::pins::submit_pin(&state, params).await,
        "retry_pin" => commands::pins::retry_pin(&state, params).await,
        "get_status" => commands::pins::get_status(&state, params).await,
        "report_replica" => commands::pins::report_replica(&state, params).await,
        "report_failure" => commands::pins::report_failure(&state, params).await,
        "pin_history" => commands::pins::pin_history(&state, params).await,
        "list_subject_pins" => commands::pins::list_subject_pins(&state, params).await,
        "list_charges" => commands::pins::list_charges(&state, params).await,

        // Billing
        "quota_snapshot" => commands::billing::quota_snapshot(&state).await,
        "get_balances" => commands::billing::get_balances(&state, params).await,
        "credit_account" => commands::billing::credit_account(&state, params).await,

        // Ingest
        "content_saved" => commands::ingest::content_saved(&state, params).await,
        "set_auto_pin" => commands::ingest::set_auto_pin(&state, params).await,
        "get_auto_pin" => commands::ingest::get_auto_pin(&state).await,

        "shutdown" => {
            let _ = state.shutdown_tx.send(());
            Ok(serde_json::json!({"stopping": true}))
        }

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

async fn stream_events<R, W>(
    state: &Arc<DaemonState>,
    request: RpcRequest,
    mut reader: BufReader<R>,
    mut writer: W,
) -> anyhow::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let filter: EventFilter = match request.params.get("filter") {
        Some(raw) if !raw.is_null() => match serde_json::from_value(raw.clone()) {
            Ok(filter) => filter,
            Err(e) => {
                let err = RpcError::invalid_params(&format!("filter: {e}"));
                return write_line(&mut writer, &RpcResponse::error(request.id, err)).await;
            }
        },
        _ => EventFilter::default(),
    };

    let mut events = state.events.subscribe();
    write_line(
        &mut writer,
        &RpcResponse::success(request.id, serde_json::json!({"subscribed": true})),
    )
    .await?;
    info!("event subscriber attached");

    let mut discard = String::new();
    loop {
        discard.clear();
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if filter.matches(&event) => {
                    write_line(&mut writer, &notification("pin_event", serde_json::to_value(&event)?)).await?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging");
                }
                Err(RecvError::Closed) => break,
            },
            read = reader.read_line(&mut discard) => {
                if read? == 0 {
                    break;
                }
            }
        }
    }
    info!("event subscriber detached");
    Ok(())
}

async fn stream_poll<R, W>(
    state: &Arc<DaemonState>,
    request: RpcRequest,
    mut reader: BufReader<R>,
    mut writer: W,
) -> anyhow::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (cid, config) = match commands::pins::poll_params(&request.params) {
        Ok(parsed) => parsed,
        Err(err) => return write_line(&mut writer, &RpcResponse::error(request.id, err)).await,
    };

    let cancel = CancellationToken::new();
    let mut handle = state.status.poll_status(cid.clone(), config, cancel.clone());
    write_line(
        &mut writer,
        &RpcResponse::success(request.id, serde_json::json!({"polling": cid.as_str()})),
    )
    .await?;

    let mut discard = String::new();
    let mut client_open = true;
    loop {
        discard.clear();
        tokio::select! {
            event = handle.next() => match event {
                Some(event) if client_open => {
                    write_line(&mut writer, &notification("poll_event", serde_json::to_value(&event)?)).await?;
                }
                Some(_) => {}
                None => break,
            },
            read = reader.read_line(&mut discard), if client_open => {
                if read? == 0 {
                    debug!(%cid, "poll client closed, cancelling");
                    cancel.cancel();
                    client_open = false;
                }
            }
        }
    }
    Ok(())
}

fn notification(method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::{Cid, PinStatus};

    #[test]
    fn test_pin_error_codes() {
        let cid = Cid::new("bafyA").expect("cid");
        assert_eq!(RpcError::from(PinError::InvalidSize).code, -32021);
        assert_eq!(RpcError::from(PinError::InvalidPrice).code, -32023);
        assert_eq!(
            RpcError::from(PinError::SizeTooLarge { size: 10, max: 5 }).code,
            -32024
        );
        assert_eq!(
            RpcError::from(PinError::AlreadyPending { cid: cid.clone() }).code,
            -32025
        );
        assert_eq!(RpcError::from(PinError::NotFound { cid: cid.clone() }).code, -32030);

        let err = RpcError::from(PinError::InsufficientFunds { amount: 20 });
        assert_eq!(err.code, -32040);
        assert_eq!(err.message, "INSUFFICIENT_FUNDS");

        let err = RpcError::from(PinError::InvalidTransition {
            cid,
            from: PinStatus::Failed,
            operation: "fail",
        });
        assert_eq!(err.code, -32031);
        assert_eq!(err.data.expect("data")["status"], "failed");
    }

    #[test]
    fn test_commit_failure_is_internal() {
        let err = RpcError::from(PinError::CommitFailed("disk I/O error".into()));
        assert_eq!(err.code, -32603);
        assert_eq!(err.message, "INTERNAL_ERROR");
    }

    #[test]
    fn test_standard_codes() {
        assert_eq!(RpcError::parse_error().code, -32700);
        assert_eq!(RpcError::invalid_request().code, -32600);
        assert_eq!(RpcError::method_not_found("unknown").code, -32601);
        assert_eq!(RpcError::invalid_params("x").code, -32602);
    }

    #[test]
    fn test_rpc_response_shapes() {
        let ok = serde_json::to_value(RpcResponse::success(
            serde_json::json!(1),
            serde_json::json!({"pin_id": 3}),
        ))
        .expect("serialize");
        assert_eq!(ok["result"]["pin_id"], 3);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(RpcResponse::error(
            serde_json::json!(2),
            RpcError::internal_error("boom"),
        ))
        .expect("serialize");
        assert_eq!(err["error"]["code"], -32603);
        assert!(err.get("result").is_none());
    }
}
