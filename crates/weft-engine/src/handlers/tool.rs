use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use weft_core::error::{Result, WeftError};

use crate::context::RunContext;
use crate::graph::Node;
use crate::handlers::{HandlerFailure, HandlerOutput, HandlerResult, NodeHandler};
use crate::template;

/// Parameters of `tool` nodes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolParams {
    tool: String,
    /// Argument object; string leaves are rendered as templates.
    #[serde(default)]
    arguments: serde_json::Value,
}

impl ToolParams {
    fn parse(node: &Node) -> Result<Self> {
        let params: ToolParams = serde_json::from_value(node.parameters.clone())
            .map_err(|e| WeftError::Configuration(format!("node '{}': {}", node.id, e)))?;
        if params.tool.trim().is_empty() {
            return Err(WeftError::Configuration(format!(
                "node '{}': tool name must not be empty",
                node.id
            )));
        }
        Ok(params)
    }
}

/// Invokes one resolved tool directly, outside any chat loop. An error
/// tool-result fails the node.
pub struct ToolHandler;

impl NodeHandler for ToolHandler {
    fn node_type(&self) -> &str {
        "tool"
    }

    fn validate(&self, node: &Node) -> Result<()> {
        ToolParams::parse(node).map(|_| ())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let params = ToolParams::parse(node)?;
            let scope = ctx.template_scope();
            let arguments = template::render_json(&params.arguments, &scope)?;
            let request_log = node
                .log_requests
                .then(|| serde_json::json!({"tool": params.tool, "arguments": arguments}));

            debug!(node_id = %node.id, tool = %params.tool, "Invoking tool node");
            let result = match ctx.tools.invoke(&params.tool, arguments).await {
                Ok(result) => result,
                Err(error) => {
                    return Err(HandlerFailure {
                        error,
                        request_log,
                        response_log: None,
                    })
                }
            };
            if result.is_error {
                return Err(HandlerFailure {
                    response_log: node
                        .log_responses
                        .then(|| serde_json::Value::String(result.content.clone())),
                    error: WeftError::ToolInvocation {
                        tool: params.tool,
                        message: result.content,
                    },
                    request_log,
                });
            }

            // Structured tool output stays structured for downstream paths.
            let payload = serde_json::from_str(&result.content)
                .unwrap_or(serde_json::Value::String(result.content));

            Ok(HandlerOutput {
                request_log,
                response_log: node.log_responses.then(|| payload.clone()),
                payload,
                usage: None,
                selected_branches: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_require_tool_name() {
        let node = Node {
            id: "t1".into(),
            node_type: "tool".into(),
            parameters: serde_json::json!({"arguments": {}}),
            log_requests: false,
            log_responses: false,
            debug: false,
            continue_on_error: false,
        };
        assert!(ToolParams::parse(&node).is_err());
    }
}
