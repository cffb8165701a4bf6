use std::sync::Arc;

use tracing::{debug, warn};

use weft_core::config::McpConfig;
use weft_core::error::Result;
use weft_core::types::{ToolDefinition, ToolResult};
use weft_mcp::McpClientManager;
use weft_tools::ToolRegistry;

/// Resolves the run's configured tool sources into a flat, read-only tool
/// set at run start.
///
/// Sources are the statically registered in-process tools plus any
/// configured MCP servers; both end up behind the same invocation contract.
pub struct ToolInvocationLayer {
    base: Arc<ToolRegistry>,
    mcp: Option<Arc<McpClientManager>>,
}

impl ToolInvocationLayer {
    pub fn new(base: Arc<ToolRegistry>) -> Self {
        Self { base, mcp: None }
    }

    pub fn with_mcp(base: Arc<ToolRegistry>, mcp: Arc<McpClientManager>) -> Self {
        Self {
            base,
            mcp: Some(mcp),
        }
    }

    /// Resolve all sources into one flat set.
    ///
    /// An MCP server that fails to connect only loses its own tools; the run
    /// proceeds without them and the failure is logged.
    pub async fn resolve(&self, mcp_config: Option<&McpConfig>) -> Arc<ResolvedTools> {
        let mut registry = ToolRegistry::new();
        for tool in self.base.all() {
            registry.register_arc(tool);
        }

        if let (Some(manager), Some(config)) = (&self.mcp, mcp_config) {
            for (name, server) in &config.servers {
                let registered = if manager.is_connected(name).await {
                    match manager.list_tools(name).await {
                        Ok(tools) => {
                            weft_mcp::register_mcp_tools(
                                &mut registry,
                                manager,
                                name,
                                &tools,
                                server.timeout_secs,
                            );
                            Ok(tools.len())
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    weft_mcp::connect_and_register(manager, name, server, &mut registry).await
                };

                match registered {
                    Ok(count) => {
                        debug!(server = %name, count, "Resolved MCP tools for run")
                    }
                    Err(e) => {
                        warn!(server = %name, error = %e, "MCP server unavailable, running without its tools")
                    }
                }
            }
        }

        Arc::new(ResolvedTools { registry })
    }
}

/// The flat tool set for one run. Read-only after resolution and safely
/// shared across the run's concurrent node tasks.
pub struct ResolvedTools {
    registry: ToolRegistry,
}

impl ResolvedTools {
    /// An empty set, for runs without tools.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            registry: ToolRegistry::new(),
        })
    }

    /// Descriptors of every resolved tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Uniform invocation, identical regardless of the tool's transport.
    pub async fn invoke(&self, name: &str, arguments: serde_json::Value) -> Result<ToolResult> {
        self.registry.invoke(name, arguments).await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.get(name).is_some()
    }
}
