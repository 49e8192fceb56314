//! MCP tool server client
//!
//! Talks JSON-RPC 2.0 over a child process's stdio, one message per line.
//! Responses are correlated to requests by id through a pending map that
//! the reader task drains.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use chat_core::{
    executor_handler, ChatError, ToolDefinition, ToolError, ToolExecutor, ToolOutcome,
    ToolRegistry,
};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP transport errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP server error: {message} (code: {code})")]
    Server { code: i64, message: String },

    #[error("MCP request '{0}' timed out")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<McpError> for ToolError {
    fn from(err: McpError) -> Self {
        match err {
            // The server understood the call and refused it
            McpError::Server { message, .. } => ToolError::Execution(message),
            other => ToolError::Transport(other.to_string()),
        }
    }
}

impl From<McpError> for ChatError {
    fn from(err: McpError) -> Self {
        ChatError::Transport(err.to_string())
    }
}

/// How to launch one tool server
#[derive(Clone, Debug)]
pub struct McpServerConfig {
    /// Name used in logs
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub request_timeout: Duration,
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        let name = args
            .last()
            .unwrap_or(&command)
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            name,
            command,
            args,
            env: HashMap::new(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Parse a whitespace separated command line such as `uv run mcp_server.py`
    pub fn parse(command_line: &str) -> Result<Self, McpError> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let command = words
            .next()
            .ok_or_else(|| McpError::Transport("empty server command".into()))?;
        Ok(Self::new(command, words.collect()))
    }
}

// JSON-RPC wire types

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
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

/// Tool as advertised by `tools/list`
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl From<McpTool> for ToolDefinition {
    fn from(tool: McpTool) -> Self {
        ToolDefinition::new(tool.name, tool.description.unwrap_or_default(), tool.input_schema)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    tools: Vec<McpTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<CallToolContent>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CallToolContent {
    Text {
        text: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Other,
}

impl CallToolResult {
    fn into_outcome(self) -> ToolOutcome {
        let text = self
            .content
            .into_iter()
            .map(|item| match item {
                CallToolContent::Text { text } => text,
                CallToolContent::Resource { resource } => resource
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| resource.to_string()),
                CallToolContent::Other => "[non-text content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        if self.is_error {
            ToolOutcome::error(text)
        } else {
            ToolOutcome::ok(text)
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Client for one MCP server
pub struct McpClient {
    config: McpServerConfig,
    writer: Arc<Mutex<Writer>>,
    pending: Pending,
    next_id: AtomicU64,
    process: Mutex<Option<Child>>,
}

impl McpClient {
    /// Spawn the server process and run the initialize handshake
    pub async fn connect(config: McpServerConfig) -> Result<Arc<Self>, McpError> {
        info!(server = %config.name, command = %config.command, "Starting MCP server");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Transport(format!("failed to spawn '{}': {}", config.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture stdout".into()))?;

        let client = Self::over(config, stdout, stdin);
        *client.process.lock().await = Some(child);
        client.initialize().await?;
        Ok(Arc::new(client))
    }

    /// Build a client over an existing byte stream pair; no handshake is sent
    pub fn over<R, W>(config: McpServerConfig, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        spawn_reader(config.name.clone(), reader, Arc::clone(&pending));
        Self {
            config,
            writer: Arc::new(Mutex::new(Box::new(writer))),
            pending,
            next_id: AtomicU64::new(1),
            process: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// `initialize` request followed by the `notifications/initialized` notice
    pub async fn initialize(&self) -> Result<Value, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "chat", "version": env!("CARGO_PKG_VERSION")},
        });
        let result = self.request("initialize", Some(params)).await?;
        self.write(&JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method: "notifications/initialized",
            params: None,
        })
        .await?;

        let remote = result
            .pointer("/serverInfo/name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!(server = %self.config.name, %remote, "MCP server initialized");
        Ok(result)
    }

    /// All tools the server offers, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {}", e)))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(server = %self.config.name, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutcome, McpError> {
        debug!(server = %self.config.name, tool = %name, "Calling MCP tool");
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("invalid tools/call result: {}", e)))?;
        Ok(result.into_outcome())
    }

    /// Register every server tool into `registry`, routed back to this client
    pub async fn register_tools(self: &Arc<Self>, registry: &mut ToolRegistry) -> chat_core::Result<usize> {
        let tools = self.list_tools().await?;
        let count = tools.len();
        for tool in tools {
            let handler = executor_handler(Arc::clone(self) as Arc<dyn ToolExecutor>, tool.name.clone());
            registry.register(tool.into(), handler)?;
        }
        info!(server = %self.config.name, count, "Registered MCP tools");
        Ok(count)
    }

    /// Close stdin and stop the server process
    pub async fn shutdown(&self) -> Result<(), McpError> {
        let _ = self.writer.lock().await.shutdown().await;
        if let Some(mut child) = self.process.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_err() {
                child.kill().await?;
            }
        }
        info!(server = %self.config.name, "MCP server stopped");
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // initialize must never be cancelled
        let in_flight = InFlight {
            id,
            pending: Arc::clone(&self.pending),
            writer: Arc::clone(&self.writer),
            armed: method != "initialize",
        };

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };
        if let Err(e) = self.write(&request).await {
            self.pending.lock().await.remove(&id);
            in_flight.disarm();
            return Err(e);
        }

        let response = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                in_flight.disarm();
                return Err(McpError::Transport(format!(
                    "server '{}' closed the connection",
                    self.config.name
                )));
            }
            Err(_) => {
                warn!(server = %self.config.name, %method, "MCP request timed out");
                return Err(McpError::Timeout(method.to_string()));
            }
        };
        in_flight.disarm();

        if let Some(error) = response.error {
            return Err(McpError::Server {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("missing result for '{}'", method)))
    }

    async fn write(&self, message: &JsonRpcRequest<'_>) -> Result<(), McpError> {
        write_line(&self.writer, message).await
    }
}

async fn write_line(writer: &Mutex<Writer>, message: &JsonRpcRequest<'_>) -> Result<(), McpError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// An unanswered request. Dropped while armed (timeout, or the caller's
/// future was dropped) it withdraws the pending entry and tells the server
/// with `notifications/cancelled`.
struct InFlight {
    id: u64,
    pending: Pending,
    writer: Arc<Mutex<Writer>>,
    armed: bool,
}

impl InFlight {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = self.id;
        let pending = Arc::clone(&self.pending);
        let writer = Arc::clone(&self.writer);
        runtime.spawn(async move {
            pending.lock().await.remove(&id);
            let notice = JsonRpcRequest {
                jsonrpc: "2.0",
                id: None,
                method: "notifications/cancelled",
                params: Some(json!({ "requestId": id, "reason": "cancelled by client" })),
            };
            if let Err(e) = write_line(&writer, &notice).await {
                debug!(request = id, error = %e, "Could not send cancellation");
            }
        });
    }
}

#[async_trait]
impl ToolExecutor for McpClient {
    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<ToolOutcome, ToolError> {
        self.call_tool(tool_name, arguments).await.map_err(ToolError::from)
    }
}

/// Route responses to their waiting requests until the stream ends
fn spawn_reader<R>(server: String, reader: R, pending: Pending)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(%server, error = %e, "MCP read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let message: JsonRpcResponse = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!(%server, error = %e, "Ignoring non JSON-RPC line");
                    continue;
                }
            };
            if let Some(method) = &message.method {
                debug!(%server, %method, "Ignoring server-initiated message");
                continue;
            }
            match message.id.as_ref().and_then(Value::as_u64) {
                Some(id) => match pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => warn!(%server, id, "Response for unknown request"),
                },
                None => warn!(%server, "Response without a usable id"),
            }
        }
        // Fail anything still waiting
        pending.lock().await.clear();
        debug!(%server, "MCP reader exited");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::ToolContent;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};
    use tokio::sync::mpsc;

    /// Minimal in-process tool server with read_doc / edit_doc over a doc map
    async fn fake_server(stream: DuplexStream) {
        let (read, mut write): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) = split(stream);
        let mut lines = BufReader::new(read).lines();
        let mut docs: HashMap<String, String> = HashMap::from([
            ("report.pdf".to_string(), "The report details the state of a 20m condenser tower.".to_string()),
            ("plan.md".to_string(), "The plan outlines the steps for the project's implementation.".to_string()),
        ]);

        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = request.get("id").cloned() else {
                continue;
            };
            let params = request.get("params").cloned().unwrap_or(Value::Null);
            let reply = match request["method"].as_str().unwrap() {
                "initialize" => json!({"jsonrpc": "2.0", "id": id, "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "DocumentMCP", "version": "1.0"}
                }}),
                "tools/list" => json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [
                    {"name": "read_doc", "description": "Read a doc",
                     "inputSchema": {"type": "object", "properties": {"doc_id": {"type": "string"}}}},
                    {"name": "edit_doc", "description": "Edit a doc",
                     "inputSchema": {"type": "object"}}
                ]}}),
                "tools/call" => {
                    let args = &params["arguments"];
                    let doc_id = args["doc_id"].as_str().unwrap_or_default().to_string();
                    match (params["name"].as_str().unwrap(), docs.get(&doc_id).cloned()) {
                        ("read_doc", Some(text)) => json!({"jsonrpc": "2.0", "id": id, "result": {
                            "content": [{"type": "text", "text": text}]
                        }}),
                        ("edit_doc", Some(text)) => {
                            let old = args["old_str"].as_str().unwrap_or_default();
                            let new = args["new_str"].as_str().unwrap_or_default();
                            docs.insert(doc_id, text.replace(old, new));
                            json!({"jsonrpc": "2.0", "id": id, "result": {"content": []}})
                        }
                        (_, None) => json!({"jsonrpc": "2.0", "id": id, "result": {
                            "content": [{"type": "text", "text": format!("Doc with id {} not found", doc_id)}],
                            "isError": true
                        }}),
                        (other, _) => json!({"jsonrpc": "2.0", "id": id,
                            "error": {"code": -32602, "message": format!("Unknown tool: {}", other)}}),
                    }
                }
                _ => json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}),
            };
            let mut out = reply.to_string();
            out.push('\n');
            write.write_all(out.as_bytes()).await.unwrap();
        }
    }

    async fn connected_client() -> Arc<McpClient> {
        let (client_side, server_side) = duplex(64 * 1024);
        tokio::spawn(fake_server(server_side));
        let (read, write) = split(client_side);
        let client = McpClient::over(McpServerConfig::new("python", vec!["mcp_server.py".into()]), read, write);
        client.initialize().await.unwrap();
        Arc::new(client)
    }

    #[test]
    fn test_parse_server_command() {
        let config = McpServerConfig::parse("uv run tools/mcp_server.py").unwrap();
        assert_eq!(config.command, "uv");
        assert_eq!(config.args, vec!["run", "tools/mcp_server.py"]);
        assert_eq!(config.name, "mcp_server.py");
        assert!(McpServerConfig::parse("   ").is_err());
    }

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method: "notifications/initialized",
            params: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    }

    #[tokio::test]
    async fn test_list_and_call_tools() {
        let client = connected_client().await;

        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_doc", "edit_doc"]);

        let outcome = client
            .call_tool("read_doc", json!({"doc_id": "report.pdf"}))
            .await
            .unwrap();
        assert!(!outcome.is_error);
        assert!(outcome.content.to_text().contains("condenser tower"));

        let missing = client.call_tool("read_doc", json!({"doc_id": "nope.txt"})).await.unwrap();
        assert!(missing.is_error);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_execution_failure() {
        let client = connected_client().await;
        let err = client
            .invoke("delete_doc", json!({"doc_id": "report.pdf"}))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Execution("Unknown tool: delete_doc".into()));
    }

    #[tokio::test]
    async fn test_register_tools_routes_through_registry() {
        let client = connected_client().await;
        let mut registry = ToolRegistry::new();
        assert_eq!(client.register_tools(&mut registry).await.unwrap(), 2);
        assert_eq!(registry.names(), vec!["read_doc", "edit_doc"]);

        let mut input = serde_json::Map::new();
        input.insert("doc_id".into(), json!("plan.md"));
        input.insert("old_str".into(), json!("steps"));
        input.insert("new_str".into(), json!("phases"));
        let edited = registry
            .dispatch(&chat_core::ToolCall::new("c1", "edit_doc", input))
            .await;
        assert!(!edited.is_error);

        let mut input = serde_json::Map::new();
        input.insert("doc_id".into(), json!("plan.md"));
        let read = registry
            .dispatch(&chat_core::ToolCall::new("c2", "read_doc", input))
            .await;
        assert_eq!(read.call_id, "c2");
        assert_eq!(
            read.content,
            ToolContent::Text("The plan outlines the phases for the project's implementation.".into())
        );

        // Registering the same server twice clashes on names
        assert!(matches!(
            client.register_tools(&mut registry).await,
            Err(ChatError::DuplicateTool(_))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_call_notifies_server() {
        let (client_side, server_side) = duplex(64 * 1024);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
        // Reads requests and never answers
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_side).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = seen_tx.send(serde_json::from_str(&line).unwrap());
            }
        });
        let (read, write) = split(client_side);
        let client = McpClient::over(McpServerConfig::new("slow", vec![]), read, write);

        let call = client.call_tool("summarize_doc", json!({"doc_id": "report.pdf"}));
        assert!(tokio::time::timeout(Duration::from_millis(50), call).await.is_err());

        let request = seen_rx.recv().await.unwrap();
        assert_eq!(request["method"], "tools/call");
        let notice = seen_rx.recv().await.unwrap();
        assert_eq!(notice["method"], "notifications/cancelled");
        assert_eq!(notice["params"]["requestId"], request["id"]);
        assert!(notice.get("id").is_none());
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_fails_pending_requests() {
        let (client_side, server_side) = duplex(1024);
        let (read, write) = split(client_side);
        let mut config = McpServerConfig::new("dead", vec![]);
        config.request_timeout = Duration::from_millis(500);
        let client = McpClient::over(config, read, write);
        drop(server_side);

        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(
            err,
            McpError::Transport(_) | McpError::Io(_) | McpError::Timeout(_)
        ));
        assert!(matches!(ToolError::from(err), ToolError::Transport(_)));
    }
}
