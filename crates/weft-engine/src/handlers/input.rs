use futures::future::BoxFuture;

use crate::context::RunContext;
use crate::graph::Node;
use crate::handlers::{HandlerOutput, HandlerResult, NodeHandler};

/// Entry node: exposes the request input as its payload so downstream
/// templates can address it as `nodes.<id>` in addition to `input.*`.
pub struct InputHandler;

impl NodeHandler for InputHandler {
    fn node_type(&self) -> &str {
        "input"
    }

    fn execute<'a>(
        &'a self,
        _node: &'a Node,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move { Ok(HandlerOutput::with_payload(ctx.input.clone())) })
    }
}
