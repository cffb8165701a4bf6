use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{MemoryStore, SecretResolver};
use weft_memory::MemoryManager;

use crate::context::{ExecutionRequest, RunContext, StreamEvent};
use crate::graph::{CompletionOutcome, ExecutionPlanner, GraphLoader, GraphModel, Node};
use crate::handlers::{HandlerFailure, HandlerRegistry};
use crate::response::{ExecutionResponse, NodeResult, NodeStatus, ResponseAssembler, RunError};
use crate::tools::ToolInvocationLayer;
use crate::trace::TraceEntry;

/// Executes validated graphs. One engine serves many runs; everything
/// mutable per request lives in the run's own `RunContext`.
///
/// All collaborators are injected: the handler registry (and through it the
/// chat capability), the secret resolver, the tool layer, and optionally a
/// memory store for cross-run persistence.
pub struct Engine {
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    memory: Arc<MemoryManager>,
    secrets: Arc<dyn SecretResolver>,
    tools: ToolInvocationLayer,
    store: Option<Arc<dyn MemoryStore>>,
}

impl Engine {
    pub fn new(
        registry: HandlerRegistry,
        config: EngineConfig,
        secrets: Arc<dyn SecretResolver>,
        tools: ToolInvocationLayer,
    ) -> Self {
        let memory = Arc::new(MemoryManager::new(config.memory_max_messages));
        Self {
            registry: Arc::new(registry),
            config,
            memory,
            secrets,
            tools,
            store: None,
        }
    }

    /// Attach a persistence collaborator; memory scopes touched by a run are
    /// hydrated from it beforehand and appended to it afterwards.
    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// A loader accepting exactly the node types this engine can execute.
    pub fn loader(&self) -> GraphLoader {
        GraphLoader::new(self.registry.known_types())
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Execute a run to completion and return the assembled response.
    pub async fn execute(
        &self,
        graph: Arc<GraphModel>,
        request: ExecutionRequest,
    ) -> ExecutionResponse {
        self.run_inner(graph, request, None).await
    }

    /// Execute a run, forwarding incremental events to `tx` as nodes start,
    /// stream content, and finish. The returned response is authoritative;
    /// the event stream is advisory.
    pub async fn execute_streaming(
        &self,
        graph: Arc<GraphModel>,
        request: ExecutionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> ExecutionResponse {
        self.run_inner(graph, request, Some(tx)).await
    }

    async fn run_inner(
        &self,
        graph: Arc<GraphModel>,
        request: ExecutionRequest,
        stream: Option<mpsc::Sender<StreamEvent>>,
    ) -> ExecutionResponse {
        // Validate every node's configuration and resolve secret
        // indirections before anything executes.
        let resolved = match self.preflight(&graph) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "Run rejected during preflight");
                return ExecutionResponse {
                    outputs: HashMap::new(),
                    trace: None,
                    token_usage: Default::default(),
                    duration_ms: 0,
                    error: Some(RunError {
                        node_id: offending_node(&e),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    }),
                };
            }
        };

        let tools = self.tools.resolve(self.config.mcp.as_ref()).await;
        let trace_enabled = request.trace || self.config.always_trace;
        let ctx = RunContext::new(
            graph.clone(),
            &request,
            tools,
            self.memory.clone(),
            trace_enabled,
            stream,
        );

        info!(
            run_id = %ctx.run_id,
            nodes = graph.node_count(),
            session_id = %ctx.session_id,
            "Starting run"
        );

        let scopes = self.memory_scopes(&resolved, &ctx.session_id);
        let pre_lens = self.hydrate_memory(&scopes).await;

        let run_error = self.drive(&graph, &resolved, &ctx).await;

        self.persist_memory(&scopes, &pre_lens).await;

        let response = ResponseAssembler::assemble(&graph, &ctx, run_error);
        info!(
            run_id = %ctx.run_id,
            duration_ms = response.duration_ms,
            total_tokens = response.token_usage.total_tokens,
            failed = response.error.is_some(),
            "Run finished"
        );
        response
    }

    /// The batch loop: yields ready nodes from the planner, executes each
    /// batch concurrently under the semaphore and the run deadline, and
    /// applies the per-node failure policy. Returns the halting error, if
    /// any.
    async fn drive(
        &self,
        graph: &GraphModel,
        resolved: &HashMap<String, Node>,
        ctx: &RunContext,
    ) -> Option<RunError> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.run_timeout_secs);
        let timeout_ms = self.config.run_timeout_secs * 1000;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut planner = ExecutionPlanner::new(graph);
        let mut run_error: Option<RunError> = None;

        loop {
            let batch = planner.next_batch();
            if batch.is_empty() {
                break;
            }
            debug!(run_id = %ctx.run_id, batch = ?batch, "Executing batch");

            let results = futures::future::join_all(batch.iter().map(|id| {
                let node = resolved.get(id).expect("planner yields known nodes");
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    ctx.emit(StreamEvent::NodeStarted {
                        node_id: node.id.clone(),
                    })
                    .await;

                    let handler = self
                        .registry
                        .get(&node.node_type)
                        .expect("node types checked in preflight");
                    let started_at = Utc::now();
                    let start = std::time::Instant::now();

                    let outcome = tokio::select! {
                        result = tokio::time::timeout_at(deadline, handler.execute(node, ctx)) => {
                            match result {
                                Ok(result) => result,
                                Err(_) => Err(HandlerFailure::from(WeftError::NodeTimeout {
                                    node_id: node.id.clone(),
                                    timeout_ms,
                                })),
                            }
                        }
                        _ = ctx.cancel.cancelled() => Err(HandlerFailure::from(WeftError::Cancelled)),
                    };

                    (node, outcome, start.elapsed().as_millis() as u64, started_at)
                }
            }))
            .await;

            // Results are folded in batch declaration order so the trace and
            // the planner transitions stay deterministic.
            let mut halt = false;
            for (node, outcome, duration_ms, started_at) in results {
                match outcome {
                    Ok(output) => {
                        ctx.trace.record(TraceEntry {
                            node_id: node.id.clone(),
                            node_type: node.node_type.clone(),
                            status: NodeStatus::Succeeded,
                            duration_ms,
                            started_at,
                            request: output.request_log,
                            response: output.response_log,
                            error: None,
                        });
                        ctx.record(NodeResult {
                            node_id: node.id.clone(),
                            status: NodeStatus::Succeeded,
                            payload: output.payload,
                            error: None,
                            duration_ms,
                            token_usage: output.usage,
                        });
                        ctx.emit(StreamEvent::NodeFinished {
                            node_id: node.id.clone(),
                            status: NodeStatus::Succeeded,
                        })
                        .await;

                        let skipped = planner.record_completion(
                            &node.id,
                            CompletionOutcome::Success {
                                live_labels: output.selected_branches,
                            },
                        );
                        mark_skipped(ctx, graph, skipped).await;
                    }
                    Err(HandlerFailure {
                        error: e,
                        request_log,
                        response_log,
                    }) => {
                        warn!(run_id = %ctx.run_id, node_id = %node.id, error = %e, "Node failed");
                        // Whatever the handler had rendered before the fault
                        // still belongs in the trace for diagnosis.
                        ctx.trace.record(TraceEntry {
                            node_id: node.id.clone(),
                            node_type: node.node_type.clone(),
                            status: NodeStatus::Failed,
                            duration_ms,
                            started_at,
                            request: request_log,
                            response: response_log,
                            error: Some(e.to_string()),
                        });
                        ctx.record(NodeResult {
                            node_id: node.id.clone(),
                            status: NodeStatus::Failed,
                            payload: serde_json::Value::Null,
                            error: Some(e.to_string()),
                            duration_ms,
                            token_usage: None,
                        });
                        ctx.emit(StreamEvent::NodeFinished {
                            node_id: node.id.clone(),
                            status: NodeStatus::Failed,
                        })
                        .await;

                        // The run deadline is not survivable, whatever the
                        // node's own failure policy says.
                        let fatal = matches!(
                            e,
                            WeftError::NodeTimeout { .. } | WeftError::Cancelled
                        );
                        if node.continue_on_error && !fatal {
                            let skipped = planner
                                .record_completion(&node.id, CompletionOutcome::FailureContinue);
                            mark_skipped(ctx, graph, skipped).await;
                        } else {
                            planner.record_completion(&node.id, CompletionOutcome::FailureHalt);
                            for id in planner.fail_downstream(&node.id) {
                                let node_type = graph
                                    .node(&id)
                                    .map(|n| n.node_type.clone())
                                    .unwrap_or_default();
                                ctx.trace.record(TraceEntry {
                                    node_id: id.clone(),
                                    node_type,
                                    status: NodeStatus::Failed,
                                    duration_ms: 0,
                                    started_at: Utc::now(),
                                    request: None,
                                    response: None,
                                    error: Some(format!("upstream node '{}' failed", node.id)),
                                });
                                ctx.record(NodeResult::dependency_failed(&id, &node.id));
                                ctx.emit(StreamEvent::NodeFinished {
                                    node_id: id,
                                    status: NodeStatus::Failed,
                                })
                                .await;
                            }
                            if run_error.is_none() {
                                run_error = Some(RunError {
                                    node_id: Some(node.id.clone()),
                                    kind: e.kind().to_string(),
                                    message: e.to_string(),
                                });
                            }
                            halt = true;
                        }
                    }
                }
            }

            if halt {
                ctx.cancel.cancel();
                break;
            }
        }

        run_error
    }

    /// Validate every node and resolve `env:` secret indirections in its
    /// parameters. Nothing executes when any node is rejected.
    fn preflight(&self, graph: &GraphModel) -> Result<HashMap<String, Node>> {
        let mut ids: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
        ids.sort_by_key(|id| graph.rank(id));

        let mut resolved = HashMap::with_capacity(ids.len());
        for id in ids {
            let node = graph.node(id).expect("iterating known ids");
            let handler = self.registry.get(&node.node_type).ok_or_else(|| {
                WeftError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                }
            })?;

            let mut node = node.clone();
            node.parameters = self.resolve_secrets(&node.id, &node.parameters)?;
            handler.validate(&node)?;
            resolved.insert(node.id.clone(), node);
        }
        Ok(resolved)
    }

    fn resolve_secrets(&self, node_id: &str, value: &serde_json::Value) -> Result<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => match s.strip_prefix("env:") {
                Some(reference) => {
                    let secret = self.secrets.resolve(reference).map_err(|_| {
                        WeftError::UnresolvedSecret {
                            node_id: node_id.to_string(),
                            reference: reference.to_string(),
                        }
                    })?;
                    Ok(serde_json::Value::String(secret))
                }
                None => Ok(value.clone()),
            },
            serde_json::Value::Array(items) => {
                let resolved: Result<Vec<_>> = items
                    .iter()
                    .map(|v| self.resolve_secrets(node_id, v))
                    .collect();
                Ok(serde_json::Value::Array(resolved?))
            }
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_secrets(node_id, v)?);
                }
                Ok(serde_json::Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Memory scopes the run will touch, as declared by each node's handler.
    fn memory_scopes(
        &self,
        resolved: &HashMap<String, Node>,
        session_id: &str,
    ) -> Vec<(String, usize)> {
        let mut scopes: Vec<(String, usize)> = Vec::new();
        for node in resolved.values() {
            if let Some(handler) = self.registry.get(&node.node_type) {
                if let Some(scope) = handler.memory_scope(node, session_id) {
                    if !scopes.iter().any(|(s, _)| *s == scope.0) {
                        scopes.push(scope);
                    }
                }
            }
        }
        scopes.sort_by(|a, b| a.0.cmp(&b.0));
        scopes
    }

    /// Seed in-run windows from the store; returns each scope's turn count
    /// after hydration, so persistence can append only the run's new turns.
    async fn hydrate_memory(&self, scopes: &[(String, usize)]) -> HashMap<String, usize> {
        if let Some(store) = &self.store {
            for (scope, bound) in scopes {
                match store.load(scope, *bound).await {
                    Ok(turns) => self.memory.hydrate(scope, turns, *bound),
                    Err(e) => {
                        warn!(scope = %scope, error = %e, "Memory hydration failed, starting empty")
                    }
                }
            }
        }
        scopes
            .iter()
            .map(|(scope, _)| (scope.clone(), self.memory.snapshot(scope).len()))
            .collect()
    }

    async fn persist_memory(&self, scopes: &[(String, usize)], pre_lens: &HashMap<String, usize>) {
        let Some(store) = &self.store else {
            return;
        };
        for (scope, _) in scopes {
            let snapshot = self.memory.snapshot(scope);
            let pre = pre_lens.get(scope).copied().unwrap_or(0).min(snapshot.len());
            let new_turns = &snapshot[pre..];
            if new_turns.is_empty() {
                continue;
            }
            if let Err(e) = store.append(scope, new_turns).await {
                warn!(scope = %scope, error = %e, "Memory persistence failed");
            }
        }
    }
}

/// Record and announce nodes the planner pruned.
async fn mark_skipped(ctx: &RunContext, graph: &GraphModel, skipped: Vec<String>) {
    for id in skipped {
        let node_type = graph
            .node(&id)
            .map(|n| n.node_type.clone())
            .unwrap_or_default();
        ctx.trace.record(TraceEntry {
            node_id: id.clone(),
            node_type,
            status: NodeStatus::Skipped,
            duration_ms: 0,
            started_at: Utc::now(),
            request: None,
            response: None,
            error: None,
        });
        ctx.record(NodeResult::skipped(&id));
        ctx.emit(StreamEvent::NodeFinished {
            node_id: id,
            status: NodeStatus::Skipped,
        })
        .await;
    }
}

fn offending_node(e: &WeftError) -> Option<String> {
    match e {
        WeftError::UnknownNodeType { node_id, .. }
        | WeftError::UnresolvedSecret { node_id, .. }
        | WeftError::NodeExecution { node_id, .. }
        | WeftError::NodeTimeout { node_id, .. } => Some(node_id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::traits::EnvSecretResolver;
    use weft_tools::ToolRegistry;

    fn engine() -> Engine {
        Engine::new(
            HandlerRegistry::new(),
            EngineConfig::default(),
            Arc::new(EnvSecretResolver),
            ToolInvocationLayer::new(Arc::new(ToolRegistry::new())),
        )
    }

    #[test]
    fn test_secret_resolution_walks_nested_parameters() {
        std::env::set_var("WEFT_RUNNER_TEST_TOKEN", "tok-123");
        let resolved = engine()
            .resolve_secrets(
                "n1",
                &serde_json::json!({
                    "headers": {"Authorization": "env:WEFT_RUNNER_TEST_TOKEN"},
                    "url": "https://example.com",
                    "retries": 3
                }),
            )
            .unwrap();
        assert_eq!(resolved["headers"]["Authorization"], "tok-123");
        assert_eq!(resolved["url"], "https://example.com");
        assert_eq!(resolved["retries"], 3);
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        let err = engine()
            .resolve_secrets("n1", &serde_json::json!({"key": "env:WEFT_RUNNER_TEST_ABSENT"}))
            .unwrap_err();
        assert!(matches!(err, WeftError::UnresolvedSecret { .. }));
        assert_eq!(err.kind(), "ConfigurationError");
    }
}
