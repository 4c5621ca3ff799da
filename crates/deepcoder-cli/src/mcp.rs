//! MCP stdio client and tool registries
//!
//! Servers speak newline-delimited JSON-RPC 2.0 over the child's stdin/stdout.
//! A background task routes responses to waiting requests by id; anything
//! else the server sends (notifications, logs) is ignored.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use deepcoder_agent::error::Error as AgentError;
use deepcoder_agent::tool::{BoxedTool, Tool, ToolRegistry, ToolResult};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{OnceCell, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::McpServerConfig;

const PROTOCOL_VERSION: &str = "2024-11-05";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// A running MCP server
pub struct McpClient {
    name: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    _child: tokio::sync::Mutex<Child>,
}

/// Tool definition as returned by `tools/list`
#[derive(Debug, Clone, Deserialize)]
struct McpToolDefinition {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object" })
}

impl McpClient {
    /// Spawn the server and complete the `initialize` handshake
    pub async fn connect(config: &McpServerConfig) -> Result<Arc<Self>> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start MCP server '{}'", config.name))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open MCP stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to open MCP stdout"))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let server = config.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => route_response(&reader_pending, &line),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("MCP server '{}' read error: {}", server, e);
                        break;
                    }
                }
            }
            // Dropping the senders fails every outstanding request.
            reader_pending.lock().clear();
        });

        let client = Arc::new(Self {
            name: config.name.clone(),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            _child: tokio::sync::Mutex::new(child),
        });

        client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "deepcoder", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await
            .with_context(|| format!("MCP server '{}' failed to initialize", config.name))?;
        client
            .notify("notifications/initialized", json!({}))
            .await?;

        tracing::info!("Connected to MCP server '{}'", config.name);
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn write_line(&self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.write_line(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(e) = self.write_line(&message).await {
            self.pending.lock().remove(&id);
            return Err(e.context(format!("MCP server '{}' is not accepting input", self.name)));
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => bail!("MCP server '{}' closed the connection", self.name),
            Err(_) => {
                self.pending.lock().remove(&id);
                bail!(
                    "MCP request '{}' to '{}' timed out after {:?}",
                    method,
                    self.name,
                    REQUEST_TIMEOUT
                )
            }
        }
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        serde_json::from_value(tools).context("malformed tools/list response")
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(call_result(&result))
    }

    /// Discover this server's tools as agent tools
    pub async fn tools(self: &Arc<Self>) -> Result<Vec<BoxedTool>> {
        let definitions = self.list_tools().await?;
        tracing::debug!("MCP server '{}' offers {} tools", self.name, definitions.len());
        Ok(definitions
            .into_iter()
            .map(|def| {
                Arc::new(McpTool {
                    client: self.clone(),
                    description: def.description.unwrap_or_default(),
                    name: def.name,
                    schema: def.input_schema,
                }) as BoxedTool
            })
            .collect())
    }
}

/// Hand a response line to whoever is waiting on its id
fn route_response(pending: &Pending, line: &str) {
    let Ok(message) = serde_json::from_str::<Value>(line) else {
        tracing::debug!("Ignoring non-JSON line from MCP server: {}", line.trim());
        return;
    };
    let Some(id) = message.get("id").and_then(|v| v.as_u64()) else {
        return;
    };
    if message.get("method").is_some() {
        // Server-to-client request; not supported.
        return;
    }
    let Some(tx) = pending.lock().remove(&id) else {
        return;
    };
    let outcome = match message.get("error") {
        Some(error) => Err(anyhow!(
            "MCP error: {}",
            error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
        )),
        None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = tx.send(outcome);
}

/// Join the text content blocks of a `tools/call` result
fn call_result(result: &Value) -> ToolResult {
    let text = match result.get("content").and_then(|v| v.as_array()) {
        Some(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(|v| v.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    };
    if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
        ToolResult::error(text)
    } else {
        ToolResult::text(text)
    }
}

/// A tool served by an MCP server
pub struct McpTool {
    client: Arc<McpClient>,
    name: String,
    description: String,
    schema: Value,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        tokio::select! {
            _ = cancel.cancelled() => ToolResult::error("Operation cancelled"),
            result = self.client.call_tool(&self.name, arguments) => match result {
                Ok(result) => result,
                Err(e) => ToolResult::error(format!("{:#}", e)),
            },
        }
    }
}

/// Tools from configured MCP servers. Servers are started on first use and
/// kept for the rest of the process.
pub struct McpRegistry {
    servers: Vec<McpServerConfig>,
    tools: OnceCell<Vec<BoxedTool>>,
}

impl McpRegistry {
    pub fn new(servers: Vec<McpServerConfig>) -> Self {
        Self {
            servers,
            tools: OnceCell::new(),
        }
    }

    async fn discover(&self) -> Result<Vec<BoxedTool>> {
        let mut tools = Vec::new();
        for server in &self.servers {
            let client = McpClient::connect(server).await?;
            tools.extend(
                client
                    .tools()
                    .await
                    .with_context(|| format!("tools/list failed on '{}'", client.name()))?,
            );
        }
        Ok(tools)
    }
}

#[async_trait]
impl ToolRegistry for McpRegistry {
    async fn tools(&self) -> deepcoder_agent::Result<Vec<BoxedTool>> {
        self.tools
            .get_or_try_init(|| self.discover())
            .await
            .cloned()
            .map_err(|e| AgentError::ToolDiscovery(format!("{:#}", e)))
    }
}

/// Concatenates registries in order. Earlier registries win name clashes.
pub struct CompositeRegistry {
    sources: Vec<Arc<dyn ToolRegistry>>,
}

impl CompositeRegistry {
    pub fn new(sources: Vec<Arc<dyn ToolRegistry>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl ToolRegistry for CompositeRegistry {
    async fn tools(&self) -> deepcoder_agent::Result<Vec<BoxedTool>> {
        let mut tools = Vec::new();
        for source in &self.sources {
            tools.extend(source.tools().await?);
        }
        Ok(tools)
    }
}
