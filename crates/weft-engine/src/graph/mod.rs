pub mod loader;
pub mod model;
pub mod planner;

pub use loader::GraphLoader;
pub use model::{Edge, GraphModel, Node};
pub use planner::{CompletionOutcome, ExecutionPlanner};
