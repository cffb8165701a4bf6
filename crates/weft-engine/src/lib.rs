//! Graph execution engine — takes a declarative node/edge description,
//! resolves execution order and branching, dispatches each node to its
//! handler, and assembles a structured result under partial failure.
//!
//! A workflow is a DAG of typed nodes (chat, tool, webhook, condition,
//! input/output markers) connected by optionally-labeled edges. The
//! `Engine` executes one request at a time against an immutable
//! `GraphModel`, running each ready batch of nodes concurrently and
//! propagating a shared `RunContext` (outputs, memory, tools, trace,
//! token accounting) across them.

pub mod context;
pub mod expr;
pub mod graph;
pub mod handlers;
pub mod response;
pub mod runner;
pub mod template;
pub mod tools;
pub mod trace;

pub use context::{ExecutionRequest, RunContext, StreamEvent};
pub use graph::{Edge, GraphLoader, GraphModel, Node};
pub use handlers::{HandlerFailure, HandlerOutput, HandlerRegistry, HandlerResult, NodeHandler};
pub use response::{ExecutionResponse, NodeResult, NodeStatus, RunError};
pub use runner::Engine;
pub use tools::{ResolvedTools, ToolInvocationLayer};
pub use trace::{TraceEntry, TraceRecorder};
