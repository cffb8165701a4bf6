//! Test doubles shared across the workspace: a scriptable chat capability
//! and a couple of deterministic tools.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{ChatCapability, Tool};
use weft_core::types::{
    ChatChunk, ChatRequest, ChatResponse, TokenUsage, ToolCallRequest, ToolResult,
};

/// Scriptable chat capability.
///
/// Responses are popped from a queue in order; with an empty queue it echoes
/// the last user message. Every request is recorded for assertions.
pub struct MockChat {
    scripted: Mutex<VecDeque<std::result::Result<ChatResponse, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a plain text response with the given usage.
    pub fn push_text(&self, content: impl Into<String>, usage: TokenUsage) {
        self.push_response(ChatResponse {
            content: content.into(),
            tool_calls: Vec::new(),
            usage,
        });
    }

    /// Queue a response asking for tool calls.
    pub fn push_tool_calls(&self, calls: Vec<ToolCallRequest>, usage: TokenUsage) {
        self.push_response(ChatResponse {
            content: String::new(),
            tool_calls: calls,
            usage,
        });
    }

    pub fn push_response(&self, response: ChatResponse) {
        self.scripted
            .lock()
            .expect("script lock poisoned")
            .push_back(Ok(response));
    }

    /// Queue a provider failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.scripted
            .lock()
            .expect("script lock poisoned")
            .push_back(Err(message.into()));
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("request lock poisoned").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("request lock poisoned").len()
    }

    async fn answer(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.requests
            .lock()
            .expect("request lock poisoned")
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        match scripted {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(WeftError::Provider(message)),
            None => {
                // Echo mode: repeat the last user message back.
                let content = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == weft_core::types::Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                Ok(ChatResponse {
                    content,
                    tool_calls: Vec::new(),
                    usage: TokenUsage::new(1, 1),
                })
            }
        }
    }
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatCapability for MockChat {
    fn send(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
        Box::pin(self.answer(request))
    }

    fn send_streaming(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<ChatChunk>,
    ) -> BoxFuture<'_, Result<ChatResponse>> {
        Box::pin(async move {
            let response = self.answer(request).await?;
            // Chunk on word boundaries so tests see more than one delta.
            for word in response.content.split_inclusive(' ') {
                let _ = tx.send(ChatChunk::ContentDelta(word.to_string())).await;
            }
            let _ = tx.send(ChatChunk::Usage(response.usage)).await;
            Ok(response)
        })
    }
}

/// Tool returning its arguments serialized as a string.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes its arguments back."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn invoke(&self, arguments: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { Ok(ToolResult::success(arguments.to_string())) })
    }
}

/// Tool that always reports an error result.
pub struct FailingTool;

impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "Always fails."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn invoke(&self, _arguments: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { Ok(ToolResult::error("deliberate failure")) })
    }
}

/// Install a test-writer tracing subscriber honoring `RUST_LOG`. Safe to
/// call from every test; only the first call wins.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Assemble a graph configuration document from node and edge arrays.
pub fn graph_doc(nodes: serde_json::Value, edges: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "schemaVersion": "1",
        "nodes": nodes,
        "edges": edges,
    })
}
