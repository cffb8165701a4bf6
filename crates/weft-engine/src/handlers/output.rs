use futures::future::BoxFuture;
use serde::Deserialize;

use weft_core::error::{Result, WeftError};

use crate::context::RunContext;
use crate::graph::Node;
use crate::handlers::{HandlerOutput, HandlerResult, NodeHandler};
use crate::template;

/// Parameters of `output` nodes.
#[derive(Debug, Deserialize, Default)]
struct OutputParams {
    /// Dotted path into the run scope selecting the payload. When absent the
    /// payload is taken from the node's predecessors.
    #[serde(default)]
    source: Option<String>,
}

impl OutputParams {
    fn parse(node: &Node) -> Result<Self> {
        if node.parameters.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(node.parameters.clone())
            .map_err(|e| WeftError::Configuration(format!("node '{}': {}", node.id, e)))
    }
}

/// Terminal node marking its payload as part of the caller-facing response.
///
/// With no `source` path, a single predecessor's payload is passed through
/// unchanged; multiple predecessors are collected into an object keyed by
/// node id.
pub struct OutputHandler;

impl NodeHandler for OutputHandler {
    fn node_type(&self) -> &str {
        "output"
    }

    fn validate(&self, node: &Node) -> Result<()> {
        OutputParams::parse(node).map(|_| ())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let params = OutputParams::parse(node)?;

            if let Some(source) = &params.source {
                let scope = ctx.template_scope();
                let value = template::resolve_path(&scope, source).ok_or_else(|| {
                    WeftError::NodeExecution {
                        node_id: node.id.clone(),
                        message: format!("unresolvable source path '{}'", source),
                    }
                })?;
                return Ok(HandlerOutput::with_payload(value.clone()));
            }

            // Only predecessors that actually produced a payload count;
            // pruned branches and failed nodes fall away here.
            let produced: Vec<(String, serde_json::Value)> = ctx
                .graph
                .incoming(&node.id)
                .filter_map(|e| {
                    ctx.result(&e.source)
                        .filter(|r| r.status == crate::response::NodeStatus::Succeeded)
                        .map(|r| (e.source.clone(), r.payload))
                })
                .collect();
            let payload = match produced.len() {
                0 => serde_json::Value::Null,
                1 => produced.into_iter().next().map(|(_, p)| p).unwrap_or_default(),
                _ => serde_json::Value::Object(produced.into_iter().collect()),
            };

            Ok(HandlerOutput::with_payload(payload))
        })
    }
}
