use std::collections::HashMap;
use std::str::FromStr;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use weft_core::error::{Result, WeftError};

use crate::context::RunContext;
use crate::graph::Node;
use crate::handlers::{HandlerFailure, HandlerOutput, HandlerResult, NodeHandler};
use crate::template;

/// Parameters of `webhook` nodes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookParams {
    /// URL template, rendered against the run scope.
    url: String,
    #[serde(default = "default_method")]
    method: String,
    /// Header values may carry secret indirections; those are resolved
    /// before the handler ever sees them.
    #[serde(default)]
    headers: HashMap<String, String>,
    /// Optional JSON body; string leaves are rendered as templates.
    #[serde(default)]
    body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "POST".to_string()
}

impl WebhookParams {
    fn parse(node: &Node) -> Result<Self> {
        let params: WebhookParams = serde_json::from_value(node.parameters.clone())
            .map_err(|e| WeftError::Configuration(format!("node '{}': {}", node.id, e)))?;
        if params.url.trim().is_empty() {
            return Err(WeftError::Configuration(format!(
                "node '{}': url must not be empty",
                node.id
            )));
        }
        reqwest::Method::from_str(&params.method.to_uppercase()).map_err(|_| {
            WeftError::Configuration(format!(
                "node '{}': unsupported HTTP method '{}'",
                node.id, params.method
            ))
        })?;
        Ok(params)
    }
}

/// Calls an external HTTP endpoint with a templated URL, headers, and body.
/// A 4xx/5xx status fails the node.
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl NodeHandler for WebhookHandler {
    fn node_type(&self) -> &str {
        "webhook"
    }

    fn validate(&self, node: &Node) -> Result<()> {
        WebhookParams::parse(node).map(|_| ())
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let params = WebhookParams::parse(node)?;
            let scope = ctx.template_scope();

            let url = template::render(&params.url, &scope)?;
            let method = reqwest::Method::from_str(&params.method.to_uppercase())
                .map_err(|_| WeftError::Configuration(format!(
                    "node '{}': unsupported HTTP method '{}'",
                    node.id, params.method
                )))?;
            let body = params
                .body
                .as_ref()
                .map(|b| template::render_json(b, &scope))
                .transpose()?;
            let request_log = node.log_requests.then(|| {
                serde_json::json!({
                    "url": url,
                    "method": method.as_str(),
                    "body": body,
                })
            });

            debug!(node_id = %node.id, %url, method = %method, "Calling webhook");

            let mut request = self.client.request(method.clone(), &url);
            for (key, value) in &params.headers {
                request = request.header(key, template::render(value, &scope)?);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    return Err(HandlerFailure {
                        error: WeftError::NodeExecution {
                            node_id: node.id.clone(),
                            message: format!("webhook request failed: {}", e),
                        },
                        request_log,
                        response_log: None,
                    })
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    return Err(HandlerFailure {
                        error: WeftError::NodeExecution {
                            node_id: node.id.clone(),
                            message: format!("webhook response read failed: {}", e),
                        },
                        request_log,
                        response_log: None,
                    })
                }
            };

            if status.is_client_error() || status.is_server_error() {
                return Err(HandlerFailure {
                    error: WeftError::NodeExecution {
                        node_id: node.id.clone(),
                        message: format!("webhook returned {}: {}", status.as_u16(), text),
                    },
                    request_log,
                    response_log: node.log_responses.then(|| {
                        serde_json::json!({"status": status.as_u16(), "body": text})
                    }),
                });
            }

            let parsed: serde_json::Value =
                serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
            let payload = serde_json::json!({
                "status": status.as_u16(),
                "body": parsed,
            });

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
