use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use rmcp::model::{CallToolRequestParams, Tool as McpTool};
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::{RoleClient, ServiceExt};

use weft_core::config::{McpServerConfig, McpTransport};
use weft_core::error::WeftError;

use crate::handler::{McpEvent, WeftClientHandler};

type McpConnection = RunningService<RoleClient, WeftClientHandler>;

/// Build a reqwest client carrying the configured headers (auth tokens and
/// the like) on every request to the server.
fn http_client_with_headers(
    headers: &HashMap<String, String>,
) -> Result<reqwest::Client, WeftError> {
    let mut default_headers = http::HeaderMap::new();
    for (key, value) in headers {
        let name = http::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| WeftError::Mcp(format!("Invalid header name '{}': {}", key, e)))?;
        let value = http::HeaderValue::from_str(value)
            .map_err(|e| WeftError::Mcp(format!("Invalid value for header '{}': {}", key, e)))?;
        default_headers.insert(name, value);
    }
    reqwest::Client::builder()
        .default_headers(default_headers)
        .build()
        .map_err(|e| WeftError::Mcp(format!("Failed to build HTTP client: {}", e)))
}

/// Manages connections to multiple MCP servers.
///
/// Transport failures are surfaced as `WeftError::Mcp`; they never take the
/// engine down.
pub struct McpClientManager {
    connections: Mutex<HashMap<String, McpConnection>>,
    server_configs: Mutex<HashMap<String, McpServerConfig>>,
    event_tx: broadcast::Sender<McpEvent>,
}

impl Default for McpClientManager {
    fn default() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            connections: Mutex::new(HashMap::new()),
            server_configs: Mutex::new(HashMap::new()),
            event_tx,
        }
    }
}

impl McpClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to MCP events (tools_changed, log messages).
    pub fn subscribe_events(&self) -> broadcast::Receiver<McpEvent> {
        self.event_tx.subscribe()
    }

    /// Connect to an MCP server.
    pub async fn connect(
        &self,
        name: &str,
        config: &McpServerConfig,
    ) -> Result<(), WeftError> {
        let handler = WeftClientHandler::new(name, self.event_tx.clone());

        let client = match &config.transport {
            McpTransport::Stdio { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }

                let transport = rmcp::transport::TokioChildProcess::new(cmd)
                    .map_err(|e| {
                        WeftError::Mcp(format!("Failed to spawn {}: {}", command, e))
                    })?;

                handler
                    .serve(transport)
                    .await
                    .map_err(|e| {
                        WeftError::Mcp(format!(
                            "Failed to initialize MCP client for {}: {}",
                            name, e
                        ))
                    })?
            }
            McpTransport::Http { url } => {
                let transport = if config.headers.is_empty() {
                    StreamableHttpClientTransport::from_uri(url.as_str())
                } else {
                    let client = http_client_with_headers(&config.headers)?;
                    StreamableHttpClientTransport::with_client(
                        client,
                        StreamableHttpClientTransportConfig::with_uri(url.clone()),
                    )
                };

                <WeftClientHandler as ServiceExt<RoleClient>>::serve(handler, transport)
                    .await
                    .map_err(|e| {
                        WeftError::Mcp(format!("MCP init for '{}' failed: {}", name, e))
                    })?
            }
        };

        info!(server = %name, "MCP server connected");

        self.connections
            .lock()
            .await
            .insert(name.to_string(), client);
        self.server_configs
            .lock()
            .await
            .insert(name.to_string(), config.clone());
        Ok(())
    }

    /// Attempt to reconnect to a server using its stored config.
    pub async fn reconnect(&self, server_name: &str) -> Result<(), WeftError> {
        let config = {
            let configs = self.server_configs.lock().await;
            configs.get(server_name).cloned().ok_or_else(|| {
                WeftError::Mcp(format!("No stored config for server '{}'", server_name))
            })?
        };

        // Remove old connection
        {
            let mut conns = self.connections.lock().await;
            if let Some(mut old) = conns.remove(server_name) {
                let _ = old.close().await;
            }
        }

        self.connect(server_name, &config).await
    }

    /// Check if a server connection is still alive.
    pub async fn is_connected(&self, server_name: &str) -> bool {
        let conns = self.connections.lock().await;
        conns
            .get(server_name)
            .map(|c| !c.is_closed())
            .unwrap_or(false)
    }

    /// List all connected server names.
    pub async fn connected_servers(&self) -> Vec<String> {
        let conns = self.connections.lock().await;
        conns.keys().cloned().collect()
    }

    /// List tools from a connected server.
    pub async fn list_tools(&self, server_name: &str) -> Result<Vec<McpTool>, WeftError> {
        let conns = self.connections.lock().await;
        let client = conns.get(server_name).ok_or_else(|| {
            WeftError::Mcp(format!("Server '{}' not connected", server_name))
        })?;

        let tools = client.list_all_tools().await.map_err(|e| {
            WeftError::Mcp(format!("Failed to list tools from '{}': {}", server_name, e))
        })?;

        debug!(server = %server_name, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call a tool on a connected server, with automatic reconnect on
    /// transport failure.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<String, WeftError> {
        let result = self
            .call_tool_inner(server_name, tool_name, arguments.clone())
            .await;

        // If transport closed, attempt one reconnect
        if let Err(ref e) = result {
            let err_str = e.to_string();
            if err_str.contains("closed") || err_str.contains("Transport") {
                warn!(server = %server_name, "MCP transport closed, attempting reconnect");
                if self.reconnect(server_name).await.is_ok() {
                    return self
                        .call_tool_inner(server_name, tool_name, arguments)
                        .await;
                }
            }
        }

        result
    }

    async fn call_tool_inner(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<String, WeftError> {
        let conns = self.connections.lock().await;
        let client = conns.get(server_name).ok_or_else(|| {
            WeftError::Mcp(format!("Server '{}' not connected", server_name))
        })?;

        let params = CallToolRequestParams {
            name: tool_name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };

        let result = client.call_tool(params).await.map_err(|e| {
            WeftError::Mcp(format!(
                "Tool call '{}.{}' failed: {}",
                server_name, tool_name, e
            ))
        })?;

        // Convert result content to string
        let content: Vec<String> = result
            .content
            .iter()
            .map(|c| match c.raw {
                rmcp::model::RawContent::Text(ref t) => t.text.to_string(),
                _ => format!("{:?}", c.raw),
            })
            .collect();

        Ok(content.join("\n"))
    }

    /// Disconnect from a specific server.
    pub async fn disconnect(&self, server_name: &str) {
        let mut conns = self.connections.lock().await;
        if let Some(mut client) = conns.remove(server_name) {
            let _ = client.close().await;
            info!(server = %server_name, "MCP server disconnected");
        }
    }

    /// Disconnect from all servers.
    pub async fn disconnect_all(&self) {
        let mut conns = self.connections.lock().await;
        let names: Vec<String> = conns.keys().cloned().collect();
        for name in names {
            if let Some(mut client) = conns.remove(&name) {
                let _ = client.close().await;
                info!(server = %name, "MCP server disconnected");
            }
        }
    }
}
