use std::collections::HashSet;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use weft_core::error::{Result, WeftError};

use crate::context::RunContext;
use crate::expr;
use crate::graph::Node;
use crate::handlers::{HandlerOutput, HandlerResult, NodeHandler};

/// One branch of a condition node.
#[derive(Debug, Deserialize)]
struct Branch {
    label: String,
    /// Condition expression evaluated against the run scope.
    when: String,
}

/// Parameters of `condition` nodes.
#[derive(Debug, Deserialize)]
struct ConditionParams {
    branches: Vec<Branch>,
    /// Fallback label when no branch matches.
    #[serde(default)]
    otherwise: Option<String>,
}

impl ConditionParams {
    fn parse(node: &Node) -> Result<Self> {
        let params: ConditionParams = serde_json::from_value(node.parameters.clone())
            .map_err(|e| WeftError::Configuration(format!("node '{}': {}", node.id, e)))?;
        if params.branches.is_empty() {
            return Err(WeftError::Configuration(format!(
                "node '{}': at least one branch is required",
                node.id
            )));
        }
        let mut seen = HashSet::new();
        for branch in &params.branches {
            if branch.label.trim().is_empty() {
                return Err(WeftError::Configuration(format!(
                    "node '{}': branch labels must not be empty",
                    node.id
                )));
            }
            if !seen.insert(branch.label.as_str()) {
                return Err(WeftError::Configuration(format!(
                    "node '{}': duplicate branch label '{}'",
                    node.id, branch.label
                )));
            }
        }
        Ok(params)
    }
}

/// Evaluates branch expressions in declaration order and keeps only the
/// first matching label's outgoing edges live. Unmatched branches are
/// pruned, cascading to nodes left with no live path.
pub struct ConditionHandler;

impl NodeHandler for ConditionHandler {
    fn node_type(&self) -> &str {
        "condition"
    }

    fn validate(&self, node: &Node) -> Result<()> {
        ConditionParams::parse(node).map(|_| ())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let params = ConditionParams::parse(node)?;
            let scope = ctx.template_scope();

            let matched = params
                .branches
                .iter()
                .find(|b| expr::evaluate(&b.when, &scope))
                .map(|b| b.label.clone())
                .or(params.otherwise);

            let selected: Vec<String> = matched.iter().cloned().collect();
            debug!(node_id = %node.id, selected = ?selected, "Condition evaluated");

            Ok(HandlerOutput {
                payload: matched
                    .map(serde_json::Value::String)
                    .unwrap_or(serde_json::Value::Null),
                usage: None,
                request_log: None,
                response_log: None,
                selected_branches: Some(selected),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(parameters: serde_json::Value) -> Node {
        Node {
            id: "route".into(),
            node_type: "condition".into(),
            parameters,
            log_requests: false,
            log_responses: false,
            debug: false,
            continue_on_error: false,
        }
    }

    #[test]
    fn test_params_require_branches() {
        assert!(ConditionParams::parse(&node(serde_json::json!({"branches": []}))).is_err());
    }

    #[test]
    fn test_params_reject_duplicate_labels() {
        let err = ConditionParams::parse(&node(serde_json::json!({
            "branches": [
                {"label": "a", "when": "input.x exists"},
                {"label": "a", "when": "input.y exists"}
            ]
        })));
        assert!(matches!(err, Err(WeftError::Configuration(_))));
    }

    #[test]
    fn test_params_accept_otherwise() {
        let params = ConditionParams::parse(&node(serde_json::json!({
            "branches": [{"label": "refund", "when": "input.intent == \"refund\""}],
            "otherwise": "fallback"
        })))
        .unwrap();
        assert_eq!(params.otherwise.as_deref(), Some("fallback"));
    }
}
