use std::collections::HashMap;

use serde::Serialize;

use weft_core::types::TokenUsage;

use crate::context::RunContext;
use crate::graph::GraphModel;
use crate::trace::TraceEntry;

/// Terminal status of one node in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of executing (or pruning) a single node. Written exactly once
/// into the run context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub status: NodeStatus,
    /// Typed output; interpretation depends on the node type.
    pub payload: serde_json::Value,
    /// Present iff the node failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Reported by chat-capable nodes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl NodeResult {
    pub fn skipped(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Skipped,
            payload: serde_json::Value::Null,
            error: None,
            duration_ms: 0,
            token_usage: None,
        }
    }

    pub fn dependency_failed(node_id: impl Into<String>, upstream: &str) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Failed,
            payload: serde_json::Value::Null,
            error: Some(format!("upstream node '{}' failed", upstream)),
            duration_ms: 0,
            token_usage: None,
        }
    }
}

/// Which node halted the run, and why.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub kind: String,
    pub message: String,
}

/// Caller-facing result of one execution request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    /// Payloads of the designated output nodes, keyed by node id.
    pub outputs: HashMap<String, serde_json::Value>,
    /// Ordered trace, present when the request asked for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<TraceEntry>>,
    pub token_usage: TokenUsage,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

/// Folds the final `RunContext` into the caller-facing response.
pub struct ResponseAssembler;

impl ResponseAssembler {
    pub fn assemble(
        graph: &GraphModel,
        ctx: &RunContext,
        error: Option<RunError>,
    ) -> ExecutionResponse {
        let mut outputs = HashMap::new();
        for id in graph.output_node_ids() {
            if let Some(result) = ctx.result(id) {
                if result.status == NodeStatus::Succeeded {
                    outputs.insert(id.to_string(), result.payload);
                }
            }
        }

        ExecutionResponse {
            outputs,
            trace: ctx.trace.entries(),
            token_usage: ctx.total_usage(),
            duration_ms: ctx.elapsed_ms(),
            error,
        }
    }
}
