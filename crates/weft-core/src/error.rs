use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Graph validation errors (load time — the run never starts)
    #[error("Graph validation failed at '{entity}': {message}")]
    Validation { entity: String, message: String },

    #[error("Unsupported graph schema version: {0}")]
    UnsupportedSchema(String),

    // Configuration errors (unknown node type, bad parameters, secrets)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown node type '{node_type}' on node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("Unresolved secret reference '{reference}' on node '{node_id}'")]
    UnresolvedSecret { node_id: String, reference: String },

    // Node execution errors (handler-level, captured into the NodeResult)
    #[error("Node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("Node '{node_id}' timed out after {timeout_ms}ms")]
    NodeTimeout { node_id: String, timeout_ms: u64 },

    #[error("Template error: {0}")]
    Template(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool invocation failed: {tool}: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Chat capability errors
    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Provider streaming error: {0}")]
    ProviderStream(String),

    // MCP errors
    #[error("MCP error: {0}")]
    Mcp(String),

    // Memory store errors
    #[error("Memory store error: {0}")]
    MemoryStore(String),

    #[error("Run cancelled")]
    Cancelled,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Caller-facing error taxonomy bucket, used as `error.kind` in responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::UnsupportedSchema(_) => "ValidationError",
            Self::Configuration(_)
            | Self::UnknownNodeType { .. }
            | Self::UnresolvedSecret { .. } => "ConfigurationError",
            Self::ToolNotFound(_) | Self::ToolInvocation { .. } | Self::ToolTimeout { .. } => {
                "ToolInvocationError"
            }
            Self::Mcp(_) => "ToolInvocationError",
            _ => "NodeExecutionError",
        }
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
