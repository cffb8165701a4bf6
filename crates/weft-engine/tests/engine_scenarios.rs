//! End-to-end engine scenarios: whole graphs executed against the scripted
//! chat capability and deterministic tools.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use weft_core::config::EngineConfig;
use weft_core::traits::EnvSecretResolver;
use weft_core::types::{TokenUsage, ToolCallRequest};
use weft_engine::{
    Engine, ExecutionRequest, GraphModel, HandlerRegistry, NodeStatus, StreamEvent,
    ToolInvocationLayer,
};
use weft_test_utils::{graph_doc, init_test_logging, EchoTool, MockChat};
use weft_tools::ToolRegistry;

fn engine_with(chat: &Arc<MockChat>, config: EngineConfig, tools: ToolRegistry) -> Engine {
    init_test_logging();
    let registry = HandlerRegistry::with_builtins(chat.clone(), &config);
    Engine::new(
        registry,
        config,
        Arc::new(EnvSecretResolver),
        ToolInvocationLayer::new(Arc::new(tools)),
    )
}

fn load(engine: &Engine, nodes: serde_json::Value, edges: serde_json::Value) -> Arc<GraphModel> {
    Arc::new(engine.loader().load(graph_doc(nodes, edges)).unwrap())
}

fn linear_chat_graph(engine: &Engine) -> Arc<GraphModel> {
    load(
        engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "chat", "type": "chat", "parameters": {"prompt": "{{input.text}}"}},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "chat"},
            {"source": "chat", "target": "out"}
        ]),
    )
}

#[tokio::test]
async fn test_linear_run_produces_output_and_usage() {
    let chat = Arc::new(MockChat::new());
    chat.push_text("hello", TokenUsage::new(1, 1));
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = linear_chat_graph(&engine);

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"text": "hi"}),
                ..Default::default()
            },
        )
        .await;

    assert!(response.error.is_none());
    assert_eq!(response.outputs["out"], json!("hello"));
    assert_eq!(response.token_usage.total_tokens, 2);

    // The rendered prompt reached the capability verbatim.
    let requests = chat.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.last().unwrap().content, "hi");
}

#[tokio::test]
async fn test_trace_is_ordered_and_opt_in() {
    let chat = Arc::new(MockChat::new());
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = linear_chat_graph(&engine);

    let silent = engine
        .execute(
            graph.clone(),
            ExecutionRequest {
                input: json!({"text": "hi"}),
                ..Default::default()
            },
        )
        .await;
    assert!(silent.trace.is_none());

    let traced = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"text": "hi"}),
                trace: true,
                ..Default::default()
            },
        )
        .await;
    let trace = traced.trace.unwrap();
    let ids: Vec<&str> = trace.iter().map(|t| t.node_id.as_str()).collect();
    assert_eq!(ids, vec!["in", "chat", "out"]);
    assert!(trace.iter().all(|t| t.status == NodeStatus::Succeeded));
}

#[tokio::test]
async fn test_condition_prunes_unselected_branch() {
    let chat = Arc::new(MockChat::new());
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "route", "type": "condition", "parameters": {
                "branches": [
                    {"label": "a", "when": "input.intent == \"sales\""},
                    {"label": "b", "when": "input.intent == \"refund\""}
                ]
            }},
            {"id": "sales", "type": "chat", "parameters": {"prompt": "sales: {{input.intent}}"}},
            {"id": "refund", "type": "chat", "parameters": {"prompt": "refund: {{input.intent}}"}},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "route"},
            {"source": "route", "target": "sales", "conditionLabel": "a"},
            {"source": "route", "target": "refund", "conditionLabel": "b"},
            {"source": "sales", "target": "out"},
            {"source": "refund", "target": "out"}
        ]),
    );

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"intent": "refund"}),
                trace: true,
                ..Default::default()
            },
        )
        .await;

    assert!(response.error.is_none());
    // Echo mode repeats the rendered prompt of the live branch.
    assert_eq!(response.outputs["out"], json!("refund: refund"));

    let trace = response.trace.unwrap();
    let sales = trace.iter().find(|t| t.node_id == "sales").unwrap();
    assert_eq!(sales.status, NodeStatus::Skipped);
    // The pruned branch never reached the capability.
    assert_eq!(chat.request_count(), 1);
}

#[tokio::test]
async fn test_condition_otherwise_label() {
    let chat = Arc::new(MockChat::new());
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "route", "type": "condition", "parameters": {
                "branches": [{"label": "known", "when": "input.intent == \"sales\""}],
                "otherwise": "fallback"
            }},
            {"id": "known", "type": "chat", "parameters": {"prompt": "known"}},
            {"id": "fallback", "type": "chat", "parameters": {"prompt": "fallback path"}},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "route"},
            {"source": "route", "target": "known", "conditionLabel": "known"},
            {"source": "route", "target": "fallback", "conditionLabel": "fallback"},
            {"source": "known", "target": "out"},
            {"source": "fallback", "target": "out"}
        ]),
    );

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"intent": "mystery"}),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(response.outputs["out"], json!("fallback path"));
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_halts_downstream() {
    let chat = Arc::new(MockChat::new().with_delay(Duration::from_secs(600)));
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = linear_chat_graph(&engine);

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"text": "hi"}),
                ..Default::default()
            },
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, "NodeExecutionError");
    assert_eq!(error.node_id.as_deref(), Some("chat"));
    // The output node never produced a payload.
    assert!(response.outputs.is_empty());
}

#[tokio::test]
async fn test_failure_halts_by_default() {
    let chat = Arc::new(MockChat::new());
    chat.push_error("model unavailable");
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = linear_chat_graph(&engine);

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"text": "hi"}),
                trace: true,
                ..Default::default()
            },
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, "NodeExecutionError");
    assert!(error.message.contains("model unavailable"));
    assert!(response.outputs.is_empty());

    // Downstream node recorded as a dependency failure, not skipped.
    let trace = response.trace.unwrap();
    let out = trace.iter().find(|t| t.node_id == "out").unwrap();
    assert_eq!(out.status, NodeStatus::Failed);
    assert!(out.error.as_ref().unwrap().contains("upstream"));
}

#[tokio::test]
async fn test_failed_chat_node_traces_rendered_request() {
    let chat = Arc::new(MockChat::new());
    chat.push_error("model unavailable");
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "chat", "type": "chat", "logRequests": true,
             "parameters": {"prompt": "{{input.text}}", "systemPrompt": "be brief"}},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "chat"},
            {"source": "chat", "target": "out"}
        ]),
    );

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"text": "diagnose me"}),
                trace: true,
                ..Default::default()
            },
        )
        .await;

    assert!(response.error.is_some());
    let trace = response.trace.unwrap();
    let failed = trace.iter().find(|t| t.node_id == "chat").unwrap();
    assert_eq!(failed.status, NodeStatus::Failed);
    // The request the model rejected is still visible for diagnosis.
    let request = failed.request.as_ref().unwrap();
    assert_eq!(request["systemPrompt"], json!("be brief"));
    assert_eq!(
        request["messages"].as_array().unwrap().last().unwrap()["content"],
        json!("diagnose me")
    );
}

#[tokio::test]
async fn test_continue_on_error_keeps_run_alive() {
    let chat = Arc::new(MockChat::new());
    chat.push_error("model unavailable");
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "chat", "type": "chat", "continueOnError": true,
             "parameters": {"prompt": "{{input.text}}"}},
            {"id": "out", "type": "output", "parameters": {"source": "input.text"}}
        ]),
        json!([
            {"source": "in", "target": "chat"},
            {"source": "chat", "target": "out"}
        ]),
    );

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"text": "hi"}),
                ..Default::default()
            },
        )
        .await;

    assert!(response.error.is_none());
    assert_eq!(response.outputs["out"], json!("hi"));
}

#[tokio::test]
async fn test_usage_sums_across_chat_nodes() {
    let chat = Arc::new(MockChat::new());
    chat.push_text("first", TokenUsage::new(10, 5));
    chat.push_text("second", TokenUsage::new(7, 3));
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "c1", "type": "chat", "parameters": {"prompt": "{{input.text}}"}},
            {"id": "c2", "type": "chat", "parameters": {"prompt": "{{nodes.c1}}"}},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "c1"},
            {"source": "c1", "target": "c2"},
            {"source": "c2", "target": "out"}
        ]),
    );

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"text": "hi"}),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(response.token_usage.prompt_tokens, 17);
    assert_eq!(response.token_usage.completion_tokens, 8);
    assert_eq!(response.token_usage.total_tokens, 25);
    assert_eq!(response.outputs["out"], json!("second"));
}

#[tokio::test]
async fn test_memory_window_carries_across_runs() {
    let chat = Arc::new(MockChat::new());
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = linear_chat_graph(&engine);

    let request = |text: &str| ExecutionRequest {
        input: json!({"text": text}),
        session_id: Some("s1".into()),
        ..Default::default()
    };

    engine.execute(graph.clone(), request("first")).await;
    engine.execute(graph, request("second")).await;

    let requests = chat.requests();
    assert_eq!(requests.len(), 2);
    // Second run carries the first exchange plus the new user turn.
    let second = &requests[1];
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.messages[0].content, "first");
    assert_eq!(second.messages[2].content, "second");
}

#[tokio::test]
async fn test_memory_store_persists_across_engines() {
    let store = Arc::new(weft_memory::SqliteMemoryStore::in_memory().unwrap());

    let request = || ExecutionRequest {
        input: json!({"text": "remember me"}),
        session_id: Some("s1".into()),
        ..Default::default()
    };

    {
        let chat = Arc::new(MockChat::new());
        let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new())
            .with_memory_store(store.clone());
        let graph = linear_chat_graph(&engine);
        engine.execute(graph, request()).await;
    }

    // A fresh engine has no in-process windows; the store hydrates them.
    let chat = Arc::new(MockChat::new());
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new())
        .with_memory_store(store);
    let graph = linear_chat_graph(&engine);
    engine.execute(graph, request()).await;

    let requests = chat.requests();
    assert_eq!(requests[0].messages.len(), 3);
    assert_eq!(requests[0].messages[0].content, "remember me");
}

#[tokio::test]
async fn test_chat_tool_loop_reaches_final_answer() {
    let chat = Arc::new(MockChat::new());
    chat.push_tool_calls(
        vec![ToolCallRequest {
            id: "call-1".into(),
            name: "echo".into(),
            arguments: json!({"q": "weather"}),
        }],
        TokenUsage::new(4, 2),
    );
    chat.push_text("sunny", TokenUsage::new(6, 3));

    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let engine = engine_with(&chat, EngineConfig::default(), tools);
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "chat", "type": "chat",
             "parameters": {"prompt": "{{input.text}}", "tools": ["echo"]}},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "chat"},
            {"source": "chat", "target": "out"}
        ]),
    );

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"text": "forecast?"}),
                ..Default::default()
            },
        )
        .await;

    assert!(response.error.is_none());
    assert_eq!(response.outputs["out"], json!("sunny"));
    // Both rounds' usage counted.
    assert_eq!(response.token_usage.total_tokens, 15);

    // The second request carried the tool result turn.
    let requests = chat.requests();
    assert_eq!(requests.len(), 2);
    let tool_turn = requests[1]
        .messages
        .iter()
        .find(|m| m.role == weft_core::types::Role::Tool)
        .unwrap();
    assert!(tool_turn.content.contains("weather"));
}

#[tokio::test]
async fn test_tool_node_output_stays_structured() {
    let chat = Arc::new(MockChat::new());
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let engine = engine_with(&chat, EngineConfig::default(), tools);
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "fetch", "type": "tool",
             "parameters": {"tool": "echo", "arguments": {"city": "{{input.city}}"}}},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "fetch"},
            {"source": "fetch", "target": "out"}
        ]),
    );

    let response = engine
        .execute(
            graph,
            ExecutionRequest {
                input: json!({"city": "Oslo"}),
                ..Default::default()
            },
        )
        .await;

    assert!(response.error.is_none());
    assert_eq!(response.outputs["out"], json!({"city": "Oslo"}));
}

#[tokio::test]
async fn test_streaming_run_emits_deltas_and_final_response() {
    let chat = Arc::new(MockChat::new());
    chat.push_text("streamed answer here", TokenUsage::new(2, 2));
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "chat", "type": "streaming_chat", "parameters": {"prompt": "{{input.text}}"}},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "chat"},
            {"source": "chat", "target": "out"}
        ]),
    );

    let (tx, mut rx) = mpsc::channel(64);
    let response = engine
        .execute_streaming(
            graph,
            ExecutionRequest {
                input: json!({"text": "go"}),
                ..Default::default()
            },
            tx,
        )
        .await;

    assert_eq!(response.outputs["out"], json!("streamed answer here"));

    let mut deltas = String::new();
    let mut finished = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::ContentDelta { delta, .. } => deltas.push_str(&delta),
            StreamEvent::NodeFinished { node_id, .. } => finished.push(node_id),
            StreamEvent::NodeStarted { .. } => {}
        }
    }
    assert_eq!(deltas, "streamed answer here");
    assert_eq!(finished, vec!["in", "chat", "out"]);
}

#[tokio::test]
async fn test_unresolved_secret_rejects_run_before_execution() {
    let chat = Arc::new(MockChat::new());
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let graph = load(
        &engine,
        json!([
            {"id": "in", "type": "input"},
            {"id": "hook", "type": "webhook", "parameters": {
                "url": "https://example.com",
                "headers": {"Authorization": "env:WEFT_SCENARIO_ABSENT_SECRET"}
            }},
            {"id": "out", "type": "output"}
        ]),
        json!([
            {"source": "in", "target": "hook"},
            {"source": "hook", "target": "out"}
        ]),
    );

    let response = engine
        .execute(graph, ExecutionRequest::default())
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, "ConfigurationError");
    assert_eq!(error.node_id.as_deref(), Some("hook"));
    assert!(response.outputs.is_empty());
    // Nothing executed, not even the entry node.
    assert_eq!(chat.request_count(), 0);
}

#[tokio::test]
async fn test_loader_rejects_duplicate_node_id() {
    let chat = Arc::new(MockChat::new());
    let engine = engine_with(&chat, EngineConfig::default(), ToolRegistry::new());
    let err = engine
        .loader()
        .load(graph_doc(
            json!([
                {"id": "a", "type": "input"},
                {"id": "a", "type": "output"}
            ]),
            json!([]),
        ))
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
}
