mod bridge;
mod client;
mod handler;

pub use bridge::register_mcp_tools;
pub use client::McpClientManager;
pub use handler::{McpEvent, WeftClientHandler};

use std::sync::Arc;

use weft_core::config::McpServerConfig;
use weft_core::error::WeftError;
use weft_tools::ToolRegistry;

/// Connect to an MCP server and register its tools into the registry.
/// Returns the number of tools registered.
pub async fn connect_and_register(
    manager: &Arc<McpClientManager>,
    server_name: &str,
    config: &McpServerConfig,
    registry: &mut ToolRegistry,
) -> Result<usize, WeftError> {
    manager.connect(server_name, config).await?;

    let tools = manager.list_tools(server_name).await?;
    let count = tools.len();

    bridge::register_mcp_tools(registry, manager, server_name, &tools, config.timeout_secs);

    Ok(count)
}
