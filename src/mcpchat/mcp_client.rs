//! MCP tool providers.
//!
//! Two transports speak the same JSON-RPC 2.0 methods (`initialize`,
//! `notifications/initialized`, `tools/list`, `tools/call`):
//!
//! - [`McpHttpProtocol`] for streamable HTTP servers. Every message is a POST;
//!   the server answers with `application/json` or a `text/event-stream` body,
//!   and may hand out an `Mcp-Session-Id` during `initialize` that is echoed on
//!   every later request.
//! - [`McpStdioProtocol`] for servers launched as a child process, one JSON
//!   message per line on stdin/stdout.
//!
//! Both connect lazily: the handshake runs on [`ToolProtocol::initialize`] or on
//! first use, whichever comes first.

use crate::mcpchat::clients::http_pool::get_http_client;
use crate::mcpchat::tool_protocol::{ToolError, ToolMetadata, ToolProtocol, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// Protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    fn call(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    fn notification(method: &'a str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn answers(&self, id: u64) -> bool {
        self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }

    fn into_result(self, method: &str) -> Result<Value, ToolError> {
        if let Some(err) = self.error {
            return Err(ToolError::ProtocolError(format!(
                "{} failed ({}): {}",
                method, err.code, err.message
            )));
        }
        self.result
            .ok_or_else(|| ToolError::ProtocolError(format!("{} returned no result", method)))
    }
}

fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcpchat",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Turn a `tools/list` result into descriptors, keeping the server's order.
pub fn parse_tool_list(result: &Value) -> Result<Vec<ToolMetadata>, ToolError> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::ProtocolError("tools/list result has no tools".to_string()))?;

    tools
        .iter()
        .map(|tool| {
            let name = tool.get("name").and_then(Value::as_str).ok_or_else(|| {
                ToolError::ProtocolError("tools/list entry without a name".to_string())
            })?;
            let description = tool
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let schema = tool
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
            Ok(ToolMetadata::from_json_schema(name, description, &schema))
        })
        .collect()
}

/// Map a `tools/call` result onto a [`ToolResult`].
///
/// `structuredContent` is preferred when present. Otherwise a single text item
/// is decoded as JSON when it parses, and kept as text when it does not.
/// `isError: true` becomes a failed result carrying the text.
pub fn map_call_result(result: &Value) -> ToolResult {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let payload = match result.get("structuredContent") {
        Some(structured) if !structured.is_null() && !is_error => structured.clone(),
        _ => content_payload(result.get("content")),
    };

    if is_error {
        let message = match payload {
            Value::String(s) => s,
            Value::Null => "tool reported an error".to_string(),
            other => other.to_string(),
        };
        ToolResult::failure(message)
    } else {
        ToolResult::success(payload)
    }
}

fn content_payload(content: Option<&Value>) -> Value {
    let items = match content.and_then(Value::as_array) {
        Some(items) if !items.is_empty() => items,
        _ => return Value::Null,
    };

    let decoded: Vec<Value> = items
        .iter()
        .map(|item| match item.get("text").and_then(Value::as_str) {
            Some(text) if item.get("type").and_then(Value::as_str) == Some("text") => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
            }
            _ => item.clone(),
        })
        .collect();

    if decoded.len() == 1 {
        decoded.into_iter().next().unwrap_or(Value::Null)
    } else {
        Value::Array(decoded)
    }
}

/// Split a `text/event-stream` body into the data payload of each event.
pub fn parse_sse_events(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut data_lines: Vec<&str> = Vec::new();
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !data_lines.is_empty() {
                events.push(data_lines.join("\n"));
                data_lines.clear();
            }
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    if !data_lines.is_empty() {
        events.push(data_lines.join("\n"));
    }
    events
}

fn boxed(err: ToolError) -> Box<dyn Error + Send + Sync> {
    Box::new(err)
}

/// MCP over streamable HTTP.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use mcpchat::mcp_client::McpHttpProtocol;
/// use mcpchat::tool_protocol::ToolRegistry;
///
/// # async {
/// let mut registry = ToolRegistry::empty();
/// let tracker = Arc::new(McpHttpProtocol::new("http://127.0.0.1:8000/mcp"));
/// registry.add_protocol("time-tracking", tracker).await.unwrap();
/// # };
/// ```
pub struct McpHttpProtocol {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
    headers: HashMap<String, String>,
    /// `None` until the handshake ran, then the session id if the server
    /// issued one. Cleared on shutdown.
    session: Mutex<Option<Option<String>>>,
    next_id: AtomicU64,
}

impl McpHttpProtocol {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            client: get_http_client(&endpoint),
            endpoint,
            timeout: Duration::from_secs(30),
            headers: HashMap::new(),
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send an extra header (e.g. `Authorization`) with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Session id issued by the server, once connected.
    pub async fn session_id(&self) -> Option<String> {
        self.session.lock().await.clone().flatten()
    }

    async fn ensure_session(&self) -> Result<Option<String>, ToolError> {
        let mut session = self.session.lock().await;
        if session.is_none() {
            *session = Some(self.handshake().await?);
        }
        Ok(session.clone().flatten())
    }

    async fn handshake(&self) -> Result<Option<String>, ToolError> {
        log::info!("Connecting to MCP server at {}", self.endpoint);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::call(id, "initialize", Some(initialize_params()));
        let (response, session_id) = self.post(&request, None).await?;
        let result = response
            .ok_or_else(|| ToolError::ProtocolError("initialize got no response".to_string()))?
            .into_result("initialize")?;
        log::debug!("MCP initialize result from {}: {}", self.endpoint, result);

        let notification = JsonRpcRequest::notification("notifications/initialized");
        self.post(&notification, session_id.as_deref()).await?;
        Ok(session_id)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let session = self.ensure_session().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::call(id, method, Some(params));
        let (response, _) = self.post(&request, session.as_deref()).await?;
        response
            .ok_or_else(|| ToolError::ProtocolError(format!("{} got no response", method)))?
            .into_result(method)
    }

    /// POST one message; returns the matching response (none for
    /// notifications) and any session id header.
    async fn post(
        &self,
        message: &JsonRpcRequest<'_>,
        session: Option<&str>,
    ) -> Result<(Option<JsonRpcResponse>, Option<String>), ToolError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            ToolError::ProtocolError(format!("MCP request to {} failed: {}", self.endpoint, e))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::ProtocolError(format!(
                "MCP server returned status {}: {}",
                status, body
            )));
        }

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ProtocolError(format!("failed to read MCP response: {}", e)))?;

        let id = match message.id {
            Some(id) => id,
            None => return Ok((None, session_id)),
        };

        let parsed = if is_sse {
            parse_sse_events(&body)
                .iter()
                .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data).ok())
                .find(|r| r.answers(id))
        } else {
            let parsed: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
                ToolError::ProtocolError(format!("invalid JSON-RPC response: {}", e))
            })?;
            Some(parsed)
        };
        Ok((parsed, session_id))
    }
}

#[async_trait]
impl ToolProtocol for McpHttpProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let result = self
            .request(
                "tools/call",
                json!({"name": tool_name, "arguments": parameters}),
            )
            .await
            .map_err(boxed)?;
        Ok(map_call_result(&result))
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        let result = self.request("tools/list", json!({})).await.map_err(boxed)?;
        parse_tool_list(&result).map_err(boxed)
    }

    fn protocol_name(&self) -> &str {
        "mcp-http"
    }

    async fn initialize(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.ensure_session().await.map_err(boxed)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        // The next request after this runs a fresh handshake.
        let session = self.session.lock().await.take().flatten();
        if let Some(session) = session {
            // Servers that do not support explicit termination answer 405.
            let response = self
                .client
                .delete(&self.endpoint)
                .timeout(self.timeout)
                .header(SESSION_HEADER, session.as_str())
                .send()
                .await?;
            log::debug!(
                "MCP session {} closed with status {}",
                session,
                response.status()
            );
        }
        Ok(())
    }
}

struct StdioConnection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StdioConnection {
    async fn send(&mut self, message: &JsonRpcRequest<'_>) -> Result<(), ToolError> {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| ToolError::ProtocolError(format!("jsonrpc serialization failed: {}", e)))?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .await
            .map_err(|e| ToolError::ProtocolError(format!("stdio write failed: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ToolError::ProtocolError(format!("stdio write failed: {}", e)))
    }

    /// Read lines until the response to `id` shows up. Server notifications and
    /// stray output are skipped.
    async fn receive(&mut self, id: u64) -> Result<JsonRpcResponse, ToolError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ToolError::ProtocolError(format!("stdio read failed: {}", e)))?;
            if read == 0 {
                return Err(ToolError::ProtocolError(
                    "MCP server closed its output".to_string(),
                ));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(response) if response.answers(id) => return Ok(response),
                Ok(_) => log::debug!("Skipping unrelated MCP message: {}", trimmed),
                Err(_) => log::debug!("Skipping non JSON-RPC output: {}", trimmed),
            }
        }
    }

    /// Send a request and wait for its response. An `Err` here means the pipe
    /// itself failed; JSON-RPC errors come back inside the response.
    async fn exchange(
        &mut self,
        id: u64,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, ToolError> {
        self.send(&JsonRpcRequest::call(id, method, params)).await?;
        self.receive(id).await
    }

    async fn call(
        &mut self,
        id: u64,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ToolError> {
        self.exchange(id, method, params).await?.into_result(method)
    }
}

/// MCP over the stdin/stdout of a child process.
///
/// Requests to one server are serialized; the child is killed on
/// [`shutdown`](ToolProtocol::shutdown) or when the protocol is dropped. If the
/// child dies mid-request, that request fails and the next one starts a fresh
/// child.
///
/// # Example
///
/// ```rust,no_run
/// use mcpchat::mcp_client::McpStdioProtocol;
///
/// let math = McpStdioProtocol::new("uv")
///     .with_args(["run", "fastmcp", "run", "calculator.py"]);
/// ```
pub struct McpStdioProtocol {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    connection: Mutex<Option<StdioConnection>>,
    next_id: AtomicU64,
}

impl McpStdioProtocol {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    async fn connect(&self) -> Result<StdioConnection, ToolError> {
        log::info!("Starting MCP server: {} {}", self.command, self.args.join(" "));
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::ProtocolError(format!("failed to spawn '{}': {}", self.command, e))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::ProtocolError("missing child stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::ProtocolError("missing child stdout".to_string()))?;

        let mut connection = StdioConnection {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let result = connection
            .call(id, "initialize", Some(initialize_params()))
            .await?;
        log::debug!("MCP initialize result from '{}': {}", self.command, result);
        connection
            .send(&JsonRpcRequest::notification("notifications/initialized"))
            .await?;
        Ok(connection)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let connection = guard
            .as_mut()
            .ok_or_else(|| ToolError::ProtocolError("not connected".to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match connection.exchange(id, method, Some(params)).await {
            Ok(response) => response.into_result(method),
            Err(e) => {
                // Dropping the connection kills the child; the next request respawns it.
                log::warn!("MCP server '{}' connection lost: {}", self.command, e);
                *guard = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ToolProtocol for McpStdioProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let result = self
            .request(
                "tools/call",
                json!({"name": tool_name, "arguments": parameters}),
            )
            .await
            .map_err(boxed)?;
        Ok(map_call_result(&result))
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        let result = self.request("tools/list", json!({})).await.map_err(boxed)?;
        parse_tool_list(&result).map_err(boxed)
    }

    fn protocol_name(&self) -> &str {
        "mcp-stdio"
    }

    async fn initialize(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await.map_err(boxed)?);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(mut connection) = self.connection.lock().await.take() {
            connection.child.kill().await?;
        }
        Ok(())
    }
}
