mod chat;
mod condition;
mod input;
mod output;
mod tool;
mod webhook;

pub use chat::{ChatHandler, StreamingChatHandler};
pub use condition::ConditionHandler;
pub use input::InputHandler;
pub use output::OutputHandler;
pub use tool::ToolHandler;
pub use webhook::WebhookHandler;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::ChatCapability;
use weft_core::types::TokenUsage;

use crate::context::RunContext;
use crate::graph::Node;

/// What a handler hands back to the runner for one node.
#[derive(Debug, Default)]
pub struct HandlerOutput {
    /// The node's output payload, visible to templates as `nodes.<id>`.
    pub payload: serde_json::Value,
    /// Token usage, reported by chat-capable handlers.
    pub usage: Option<TokenUsage>,
    /// Rendered request, recorded when the node sets `logRequests`.
    pub request_log: Option<serde_json::Value>,
    /// Raw response, recorded when the node sets `logResponses`.
    pub response_log: Option<serde_json::Value>,
    /// For condition nodes: the branch labels whose outgoing edges stay
    /// live. `None` means all outgoing edges stay live.
    pub selected_branches: Option<Vec<String>>,
}

impl HandlerOutput {
    pub fn with_payload(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }
}

/// A node failure, carrying whatever logs the handler had rendered before
/// the fault so the trace still shows the failing exchange.
#[derive(Debug)]
pub struct HandlerFailure {
    pub error: WeftError,
    /// Rendered request, when the node sets `logRequests`.
    pub request_log: Option<serde_json::Value>,
    /// Raw response, when the node sets `logResponses`.
    pub response_log: Option<serde_json::Value>,
}

impl From<WeftError> for HandlerFailure {
    fn from(error: WeftError) -> Self {
        Self {
            error,
            request_log: None,
            response_log: None,
        }
    }
}

pub type HandlerResult = std::result::Result<HandlerOutput, HandlerFailure>;

/// Execution strategy for one node type. Implementations are stateless with
/// respect to runs; all per-run state lives in the `RunContext`.
pub trait NodeHandler: Send + Sync + 'static {
    /// The node type discriminator this handler serves.
    fn node_type(&self) -> &str;

    /// Validate a node's parameters without executing it. Called for every
    /// node before the run starts, so malformed configuration fails the run
    /// before any side effects.
    fn validate(&self, node: &Node) -> Result<()> {
        let _ = node;
        Ok(())
    }

    /// Execute the node against the run context.
    fn execute<'a>(&'a self, node: &'a Node, ctx: &'a RunContext)
        -> BoxFuture<'a, HandlerResult>;

    /// The memory scope and window bound this node reads and writes, if it
    /// participates in conversation memory. The runner hydrates and persists
    /// these scopes through the configured memory store.
    fn memory_scope(&self, node: &Node, session_id: &str) -> Option<(String, usize)> {
        let _ = (node, session_id);
        None
    }
}

/// Registry mapping node type discriminators to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with all built-in handlers, wired to the given chat
    /// capability.
    pub fn with_builtins(chat: Arc<dyn ChatCapability>, config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        let http = reqwest::Client::new();
        registry.register(InputHandler);
        registry.register(ChatHandler::new(chat.clone(), config));
        registry.register(StreamingChatHandler::new(chat, config));
        registry.register(ToolHandler);
        registry.register(WebhookHandler::new(http));
        registry.register(ConditionHandler);
        registry.register(OutputHandler);
        registry
    }

    pub fn register(&mut self, handler: impl NodeHandler) {
        self.handlers
            .insert(handler.node_type().to_string(), Arc::new(handler));
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }

    /// The set of node types this registry can execute; the loader rejects
    /// graphs naming any other type.
    pub fn known_types(&self) -> HashSet<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
