use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::ChatCapability;
use weft_core::types::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, TokenUsage, ToolDefinition, ToolResult,
};

use crate::context::{RunContext, StreamEvent};
use crate::graph::Node;
use crate::handlers::{HandlerFailure, HandlerOutput, HandlerResult, NodeHandler};
use crate::template;

/// Parameters of `chat` and `streaming_chat` nodes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatParams {
    /// Prompt template, rendered against the run scope.
    prompt: String,
    #[serde(default)]
    system_prompt: Option<String>,
    /// Memory scope key; defaults to the node id.
    #[serde(default)]
    memory_key: Option<String>,
    /// Window bound for this node's memory scope.
    #[serde(default)]
    max_messages: Option<usize>,
    /// Names of resolved tools this node exposes to the model.
    #[serde(default)]
    tools: Vec<String>,
}

impl ChatParams {
    fn parse(node: &Node) -> Result<Self> {
        let params: ChatParams = serde_json::from_value(node.parameters.clone())
            .map_err(|e| WeftError::Configuration(format!("node '{}': {}", node.id, e)))?;
        if params.prompt.trim().is_empty() {
            return Err(WeftError::Configuration(format!(
                "node '{}': prompt must not be empty",
                node.id
            )));
        }
        Ok(params)
    }
}

/// Talks to the injected chat capability: renders the prompt, carries the
/// node's memory window, and runs a bounded tool-call loop before producing
/// the final text payload.
pub struct ChatHandler {
    chat: Arc<dyn ChatCapability>,
    max_tool_rounds: usize,
    default_max_messages: usize,
}

impl ChatHandler {
    pub fn new(chat: Arc<dyn ChatCapability>, config: &EngineConfig) -> Self {
        Self {
            chat,
            max_tool_rounds: config.max_tool_rounds,
            default_max_messages: config.memory_max_messages,
        }
    }
}

impl NodeHandler for ChatHandler {
    fn node_type(&self) -> &str {
        "chat"
    }

    fn validate(&self, node: &Node) -> Result<()> {
        ChatParams::parse(node).map(|_| ())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(run_chat(
            self.chat.as_ref(),
            node,
            ctx,
            self.max_tool_rounds,
            self.default_max_messages,
            false,
        ))
    }

    fn memory_scope(&self, node: &Node, session_id: &str) -> Option<(String, usize)> {
        memory_scope_of(node, session_id, self.default_max_messages)
    }
}

/// Same contract as [`ChatHandler`], but forwards content deltas to the
/// run's stream sender as they arrive. Downstream nodes only ever see the
/// final aggregate payload.
pub struct StreamingChatHandler {
    chat: Arc<dyn ChatCapability>,
    max_tool_rounds: usize,
    default_max_messages: usize,
}

impl StreamingChatHandler {
    pub fn new(chat: Arc<dyn ChatCapability>, config: &EngineConfig) -> Self {
        Self {
            chat,
            max_tool_rounds: config.max_tool_rounds,
            default_max_messages: config.memory_max_messages,
        }
    }
}

impl NodeHandler for StreamingChatHandler {
    fn node_type(&self) -> &str {
        "streaming_chat"
    }

    fn validate(&self, node: &Node) -> Result<()> {
        ChatParams::parse(node).map(|_| ())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(run_chat(
            self.chat.as_ref(),
            node,
            ctx,
            self.max_tool_rounds,
            self.default_max_messages,
            true,
        ))
    }

    fn memory_scope(&self, node: &Node, session_id: &str) -> Option<(String, usize)> {
        memory_scope_of(node, session_id, self.default_max_messages)
    }
}

fn memory_scope_of(node: &Node, session_id: &str, default_max: usize) -> Option<(String, usize)> {
    let params = ChatParams::parse(node).ok()?;
    let scope = format!(
        "{}:{}",
        session_id,
        params.memory_key.as_deref().unwrap_or(&node.id)
    );
    Some((scope, params.max_messages.unwrap_or(default_max)))
}

async fn run_chat(
    chat: &dyn ChatCapability,
    node: &Node,
    ctx: &RunContext,
    max_tool_rounds: usize,
    default_max_messages: usize,
    streaming: bool,
) -> HandlerResult {
    let params = ChatParams::parse(node)?;
    let scope = ctx.template_scope();

    let prompt = template::render(&params.prompt, &scope)?;
    let system_prompt = params
        .system_prompt
        .as_deref()
        .map(|s| template::render(s, &scope))
        .transpose()?;

    let memory_scope = format!(
        "{}:{}",
        ctx.session_id,
        params.memory_key.as_deref().unwrap_or(&node.id)
    );
    let max_messages = params.max_messages.unwrap_or(default_max_messages);

    let tool_defs = select_tools(ctx, &params.tools);

    let mut messages = ctx.memory.snapshot(&memory_scope);
    messages.push(ChatMessage::user(prompt.clone()));

    let mut usage = TokenUsage::default();
    let mut rounds = 0;
    let mut request_log: Option<serde_json::Value>;
    let response = loop {
        let request = ChatRequest {
            system_prompt: system_prompt.clone(),
            messages: messages.clone(),
            tools: tool_defs.clone(),
        };
        request_log = node.log_requests.then(|| describe_request(&request));

        let sent = if streaming {
            send_streaming(chat, node, ctx, request).await
        } else {
            chat.send(request).await
        };
        let response = match sent {
            Ok(response) => response,
            Err(error) => {
                return Err(HandlerFailure {
                    error,
                    request_log,
                    response_log: None,
                })
            }
        };
        usage.add(response.usage);

        if response.tool_calls.is_empty() {
            break response;
        }
        if rounds >= max_tool_rounds {
            warn!(node_id = %node.id, rounds, "Tool round budget exhausted");
            break response;
        }
        rounds += 1;

        messages.push(ChatMessage::assistant(describe_tool_calls(&response)));
        for call in &response.tool_calls {
            debug!(node_id = %node.id, tool = %call.name, "Invoking tool");
            let result = match ctx.tools.invoke(&call.name, call.arguments.clone()).await {
                Ok(result) => result,
                // The model gets to see the failure and react to it.
                Err(e) => ToolResult::error(e.to_string()),
            };
            let prefix = if result.is_error { "error" } else { "result" };
            messages.push(ChatMessage::tool(format!(
                "{} ({}): {}",
                call.name, prefix, result.content
            )));
        }
    };

    ctx.memory
        .append_bounded(&memory_scope, ChatMessage::user(prompt), max_messages);
    ctx.memory.append_bounded(
        &memory_scope,
        ChatMessage::assistant(response.content.clone()),
        max_messages,
    );

    let response_log = node.log_responses.then(|| {
        serde_json::json!({
            "content": response.content,
            "toolRounds": rounds,
        })
    });

    Ok(HandlerOutput {
        payload: serde_json::Value::String(response.content),
        usage: Some(usage),
        request_log,
        response_log,
        selected_branches: None,
    })
}

fn describe_request(request: &ChatRequest) -> serde_json::Value {
    serde_json::json!({
        "systemPrompt": request.system_prompt,
        "messages": request.messages,
        "tools": request.tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
    })
}

/// Resolve the node's tool names against the run's resolved set. Names that
/// did not resolve (e.g. an MCP server that was unavailable at run start)
/// are skipped with a warning rather than failing the node.
fn select_tools(ctx: &RunContext, names: &[String]) -> Vec<ToolDefinition> {
    if names.is_empty() {
        return Vec::new();
    }
    let available = ctx.tools.definitions();
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        match available.iter().find(|d| &d.name == name) {
            Some(def) => selected.push(def.clone()),
            None => warn!(tool = %name, "Configured tool not resolved for this run"),
        }
    }
    selected
}

async fn send_streaming(
    chat: &dyn ChatCapability,
    node: &Node,
    ctx: &RunContext,
    request: ChatRequest,
) -> Result<ChatResponse> {
    let (tx, mut rx) = mpsc::channel(32);
    let send = chat.send_streaming(request, tx);
    let forward = async {
        while let Some(chunk) = rx.recv().await {
            if let ChatChunk::ContentDelta(delta) = chunk {
                ctx.emit(StreamEvent::ContentDelta {
                    node_id: node.id.clone(),
                    delta,
                })
                .await;
            }
        }
    };
    let (response, ()) = tokio::join!(send, forward);
    response
}

fn describe_tool_calls(response: &ChatResponse) -> String {
    let calls: Vec<String> = response
        .tool_calls
        .iter()
        .map(|c| format!("{}({})", c.name, c.arguments))
        .collect();
    if response.content.is_empty() {
        format!("[calling {}]", calls.join(", "))
    } else {
        format!("{}\n[calling {}]", response.content, calls.join(", "))
    }
}
