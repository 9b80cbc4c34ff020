use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use switchboard_core::assistant::{Assistant, RemoteServerConfig, STDIO_TRANSPORT};
use switchboard_core::capability::CapabilityDefinition;
use switchboard_core::protocol::{codes, ProtocolResponse, ToolCall};
use switchboard_core::schema::validate_definition;

use super::wire::{self, IncomingFrame, JsonRpcRequest, ToolsListResult};
use super::{RemoteCapabilityClient, RemoteError};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<IncomingFrame>>>>;

/// One running server process.
struct ServerConnection {
    name: String,
    tx: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    definitions: RwLock<Vec<CapabilityDefinition>>,
    cancel: CancellationToken,
    _child: Mutex<Child>,
}

impl ServerConnection {
    async fn spawn(
        config: &RemoteServerConfig,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>, RemoteError> {
        let spawn_err = |reason: String| RemoteError::Spawn {
            server: config.name.clone(),
            reason,
        };
        let command = config
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| spawn_err("no command configured".into()))?;

        let mut child = Command::new(command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_err(e.to_string()))?;

        let stdin = child.stdin.take().ok_or_else(|| spawn_err("stdin unavailable".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_err("stdout unavailable".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| spawn_err("stderr unavailable".into()))?;

        let cancel = parent.child_token();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel::<String>(64);

        tokio::spawn(write_loop(config.name.clone(), stdin, rx, cancel.clone()));
        tokio::spawn(read_loop(config.name.clone(), stdout, pending.clone(), cancel.clone()));
        tokio::spawn(stderr_loop(config.name.clone(), stderr, cancel.clone()));

        Ok(Arc::new(Self {
            name: config.name.clone(),
            tx,
            pending,
            next_id: AtomicU64::new(1),
            definitions: RwLock::new(Vec::new()),
            cancel,
            _child: Mutex::new(child),
        }))
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RemoteError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&JsonRpcRequest::call(id, method, params))
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;

        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.lock().insert(id, resp_tx);

        if self.tx.send(line).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(RemoteError::Closed);
        }

        match tokio::time::timeout(timeout, resp_rx).await {
            Ok(Ok(frame)) => frame.into_result(),
            Ok(Err(_)) => Err(RemoteError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                let timeout_ms = timeout.as_millis() as u64;
                warn!(server = %self.name, method, timeout_ms, "remote request timed out");
                Err(RemoteError::Timeout(timeout))
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<(), RemoteError> {
        let line = serde_json::to_string(&JsonRpcRequest::notification(method))
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        self.tx.send(line).await.map_err(|_| RemoteError::Closed)
    }

    async fn handshake(&self, timeout: Duration) -> Result<(), RemoteError> {
        self.request("initialize", wire::initialize_params(), timeout).await?;
        self.notify("notifications/initialized").await?;

        let mut defs = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let value = self.request("tools/list", params, timeout).await?;
            let page: ToolsListResult = serde_json::from_value(value)
                .map_err(|e| RemoteError::Protocol(format!("tools/list: {e}")))?;
            for tool in page.tools {
                let def = wire::to_definition(&self.name, tool);
                match validate_definition(&def) {
                    Ok(()) => defs.push(def),
                    Err(reason) => warn!(
                        server = %self.name,
                        %reason,
                        "skipping remote tool with invalid schema"
                    ),
                }
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!(server = %self.name, tools = defs.len(), "remote server connected");
        *self.definitions.write() = defs;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn write_loop(
    server: String,
    mut stdin: tokio::process::ChildStdin,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        if let Err(e) = write.await {
            warn!(%server, error = %e, "failed to write to remote server");
            break;
        }
    }
    cancel.cancel();
}

async fn read_loop(
    server: String,
    stdout: tokio::process::ChildStdout,
    pending: Pending,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let frame: IncomingFrame = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(%server, error = %e, "ignoring non-JSON-RPC output");
                        continue;
                    }
                };
                let Some(id) = frame.response_id() else {
                    debug!(%server, method = ?frame.method, "ignoring server-initiated message");
                    continue;
                };
                match pending.lock().remove(&id) {
                    Some(sender) => {
                        let _ = sender.send(frame);
                    }
                    None => debug!(%server, id, "response for unknown request"),
                }
            }
            Ok(None) => {
                info!(%server, "remote server closed stdout");
                break;
            }
            Err(e) => {
                warn!(%server, error = %e, "error reading remote server output");
                break;
            }
        }
    }
    // Dropping the senders wakes every waiter with Closed.
    pending.lock().clear();
    cancel.cancel();
}

async fn stderr_loop(
    server: String,
    stderr: tokio::process::ChildStderr,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => debug!(%server, "{}", line.trim_end()),
                _ => break,
            },
        }
    }
}

/// JSON-RPC 2.0 client for capability servers spoken to over stdio.
///
/// Tools are exposed as `<server>__<tool>`. Connections are kept across
/// assistant switches; `definitions` reflects the last connected assistant.
pub struct StdioRemoteClient {
    servers: DashMap<String, Arc<ServerConnection>>,
    active: RwLock<Vec<String>>,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl StdioRemoteClient {
    pub fn new() -> Self {
        Self {
            servers: DashMap::new(),
            active: RwLock::new(Vec::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stop one server. Returns whether it was connected.
    pub fn disconnect(&self, server: &str) -> bool {
        self.active.write().retain(|s| s != server);
        self.servers.remove(server).is_some()
    }

    /// Stop every server process.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.servers.clear();
        self.active.write().clear();
    }

    async fn ensure_connected(&self, config: &RemoteServerConfig) -> Result<(), RemoteError> {
        if config.transport != STDIO_TRANSPORT {
            return Err(RemoteError::UnsupportedTransport {
                server: config.name.clone(),
                transport: config.transport.clone(),
            });
        }
        if let Some(existing) = self.servers.get(&config.name) {
            if existing.is_alive() {
                return Ok(());
            }
        }
        self.servers.remove(&config.name);

        let conn = ServerConnection::spawn(config, &self.cancel).await?;
        conn.handshake(self.request_timeout).await?;
        self.servers.insert(config.name.clone(), conn);
        Ok(())
    }
}

impl Default for StdioRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StdioRemoteClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl RemoteCapabilityClient for StdioRemoteClient {
    #[instrument(skip(self, assistant), fields(assistant_id = %assistant.id))]
    async fn connect(&self, assistant: &Assistant) -> Result<(), RemoteError> {
        let mut first_error = None;
        let mut active = Vec::new();
        for config in &assistant.remote_servers {
            match self.ensure_connected(config).await {
                Ok(()) => active.push(config.name.clone()),
                Err(e) => {
                    warn!(server = %config.name, error = %e, "failed to connect remote server");
                    first_error.get_or_insert(e);
                }
            }
        }
        *self.active.write() = active;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn definitions(&self) -> Vec<CapabilityDefinition> {
        let active = self.active.read().clone();
        active
            .iter()
            .filter_map(|name| self.servers.get(name).map(|c| c.definitions.read().clone()))
            .flatten()
            .collect()
    }

    fn definitions_for(&self, assistant: &Assistant) -> Vec<CapabilityDefinition> {
        assistant
            .remote_servers
            .iter()
            .filter_map(|s| self.servers.get(&s.name).map(|c| c.definitions.read().clone()))
            .flatten()
            .collect()
    }

    #[instrument(skip(self, call), fields(tool = %call.name(), call_id = %call.id))]
    async fn execute(&self, call: &ToolCall) -> ProtocolResponse {
        let Some((server, tool)) = wire::split_name(call.name()) else {
            return ProtocolResponse::not_found(call);
        };
        let Some(conn) = self.servers.get(server).map(|c| Arc::clone(c.value())) else {
            return ProtocolResponse::not_found(call);
        };
        if !conn.definitions.read().iter().any(|d| d.name == call.name()) {
            return ProtocolResponse::not_found(call);
        }

        let arguments = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                return ProtocolResponse::failure(
                    &call.id,
                    codes::INVALID_ARGUMENTS,
                    format!("Error executing tool: {e}"),
                )
            }
        };

        let params = json!({ "name": tool, "arguments": arguments });
        match conn.request("tools/call", params, self.request_timeout).await {
            Ok(value) => wire::call_result_to_response(&call.id, value),
            Err(e) => {
                warn!(server, error = %e, "remote call failed");
                wire::error_to_response(&call.id, &e)
            }
        }
    }
}
