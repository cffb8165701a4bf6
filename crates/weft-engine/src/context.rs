use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use weft_core::types::{RunId, TokenUsage};
use weft_memory::MemoryManager;

use crate::graph::GraphModel;
use crate::response::{NodeResult, NodeStatus};
use crate::tools::ResolvedTools;
use crate::trace::TraceRecorder;

/// An execution request, as handed over by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Free-form keyed values available to templates as `input.*`.
    pub input: serde_json::Value,
    /// Include the ordered trace in the response.
    pub trace: bool,
    pub debug: bool,
    /// Logical conversation session; scopes memory windows across runs.
    pub session_id: Option<String>,
}

/// Incremental events emitted during a streaming execution.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    NodeStarted { node_id: String },
    /// A chunk of content from a streaming chat node.
    ContentDelta { node_id: String, delta: String },
    NodeFinished { node_id: String, status: NodeStatus },
}

/// Mutable per-request shared state, created fresh per execution and
/// discarded once the response is assembled. Never shared across runs.
///
/// Outputs are write-once per node; the planner's ordering guarantees that
/// handlers only read entries of completed predecessors.
pub struct RunContext {
    pub run_id: RunId,
    pub graph: Arc<GraphModel>,
    pub input: serde_json::Value,
    pub session_id: String,
    pub trace: TraceRecorder,
    pub tools: Arc<ResolvedTools>,
    pub memory: Arc<MemoryManager>,
    pub cancel: CancellationToken,
    pub debug: bool,
    pub stream: Option<mpsc::Sender<StreamEvent>>,
    outputs: RwLock<HashMap<String, NodeResult>>,
    usage: Mutex<TokenUsage>,
    started_at: Instant,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        graph: Arc<GraphModel>,
        request: &ExecutionRequest,
        tools: Arc<ResolvedTools>,
        memory: Arc<MemoryManager>,
        trace_enabled: bool,
        stream: Option<mpsc::Sender<StreamEvent>>,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            graph,
            input: request.input.clone(),
            session_id: request
                .session_id
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            trace: TraceRecorder::new(trace_enabled),
            tools,
            memory,
            cancel: CancellationToken::new(),
            debug: request.debug,
            stream,
            outputs: RwLock::new(HashMap::new()),
            usage: Mutex::new(TokenUsage::default()),
            started_at: Instant::now(),
        }
    }

    /// Record a node's result. Write-once: a second write for the same node
    /// is dropped with a warning.
    pub fn record(&self, result: NodeResult) {
        let mut outputs = self.outputs.write().expect("outputs lock poisoned");
        if outputs.contains_key(&result.node_id) {
            warn!(node_id = %result.node_id, "Duplicate node result dropped");
            return;
        }
        if let Some(usage) = result.token_usage {
            self.usage.lock().expect("usage lock poisoned").add(usage);
        }
        outputs.insert(result.node_id.clone(), result);
    }

    /// The recorded result for a node, if any.
    pub fn result(&self, node_id: &str) -> Option<NodeResult> {
        self.outputs
            .read()
            .expect("outputs lock poisoned")
            .get(node_id)
            .cloned()
    }

    /// A completed node's payload.
    pub fn output_payload(&self, node_id: &str) -> Option<serde_json::Value> {
        self.result(node_id).map(|r| r.payload)
    }

    /// Aggregated token usage so far.
    pub fn total_usage(&self) -> TokenUsage {
        *self.usage.lock().expect("usage lock poisoned")
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// The dotted-path lookup scope for templates and condition expressions:
    /// `input.*` plus `nodes.<id>.*` over completed node payloads.
    pub fn template_scope(&self) -> serde_json::Value {
        let outputs = self.outputs.read().expect("outputs lock poisoned");
        let nodes: serde_json::Map<String, serde_json::Value> = outputs
            .values()
            .filter(|r| r.status != NodeStatus::Skipped)
            .map(|r| (r.node_id.clone(), r.payload.clone()))
            .collect();
        serde_json::json!({
            "input": self.input,
            "nodes": nodes,
        })
    }

    /// Forward a stream event if this run is streaming.
    pub async fn emit(&self, event: StreamEvent) {
        if let Some(tx) = &self.stream {
            let _ = tx.send(event).await;
        }
    }
}
