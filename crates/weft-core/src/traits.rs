use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::*;

/// Chat capability — one implementation per LLM provider, injected into the
/// engine. The engine only ever sees this uniform contract.
pub trait ChatCapability: Send + Sync + 'static {
    /// Send a chat request and wait for the complete response.
    fn send(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>>;

    /// Send a chat request, forwarding incremental chunks to `tx` as they
    /// arrive. The returned response is the final aggregate; downstream
    /// consumers must only rely on it, never on the chunk stream.
    fn send_streaming(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<ChatChunk>,
    ) -> BoxFuture<'_, Result<ChatResponse>> {
        let _ = tx;
        self.send(request)
    }
}

/// Tool — extensible tool execution, local or bridged to a remote transport.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Invoke the tool with the given arguments.
    fn invoke(&self, arguments: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Resolves secret indirection markers found in node parameters.
///
/// The engine never reads secrets itself; any parameter string carrying the
/// `env:` marker is passed through this collaborator before the handler sees
/// it.
pub trait SecretResolver: Send + Sync + 'static {
    fn resolve(&self, reference: &str) -> Result<String>;
}

/// Default resolver backed by process environment variables.
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, reference: &str) -> Result<String> {
        std::env::var(reference).map_err(|_| crate::error::WeftError::Configuration(format!(
            "environment variable '{}' is not set",
            reference
        )))
    }
}

/// Memory persistence collaborator. The in-run windowing contract lives in
/// the memory manager; this trait only covers hydrating a scope before a run
/// and persisting it afterwards.
pub trait MemoryStore: Send + Sync + 'static {
    /// Load the persisted turns for a scope, oldest first.
    fn load(&self, scope: &str, limit: usize) -> BoxFuture<'_, Result<Vec<ChatMessage>>>;

    /// Append turns to a scope.
    fn append(&self, scope: &str, turns: &[ChatMessage]) -> BoxFuture<'_, Result<()>>;
}
