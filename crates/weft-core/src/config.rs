use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum nodes executed concurrently within one ready batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Whole-run deadline in seconds; in-flight external calls are cancelled
    /// when it elapses.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Default memory window size for chat nodes that do not set their own.
    #[serde(default = "default_memory_max_messages")]
    pub memory_max_messages: usize,
    /// Maximum tool-call rounds a single chat node may perform.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Record trace entries even when the request does not ask for them.
    #[serde(default)]
    pub always_trace: bool,
    /// MCP tool sources resolved at run start.
    #[serde(default)]
    pub mcp: Option<McpConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            run_timeout_secs: default_run_timeout(),
            memory_max_messages: default_memory_max_messages(),
            max_tool_rounds: default_max_tool_rounds(),
            always_trace: false,
            mcp: None,
        }
    }
}

fn default_max_concurrency() -> usize { 4 }
fn default_run_timeout() -> u64 { 120 }
fn default_memory_max_messages() -> usize { 20 }
fn default_max_tool_rounds() -> usize { 5 }

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WeftError::Configuration(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| WeftError::Configuration(format!("{}: {}", path.display(), e)))
    }
}

/// MCP tool-source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub transport: McpTransport,
    /// Per-tool-call timeout in seconds. Default: 120.
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
    /// Custom HTTP headers for the HTTP transport (e.g., auth tokens).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_mcp_timeout() -> u64 { 120 }

/// MCP transport configuration. Transport choice is configuration, not core
/// logic — both produce the same uniform tool contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
    },
}
