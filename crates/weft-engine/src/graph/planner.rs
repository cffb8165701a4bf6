use std::collections::HashMap;

use tracing::debug;

use super::model::GraphModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Ready,
    Running,
    Done,
}

/// How a node's completion resolves its outgoing edges.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// The node succeeded. A condition node supplies the branch labels it
    /// selected; `None` leaves every outgoing edge live.
    Success { live_labels: Option<Vec<String>> },
    /// The node failed but the graph continues past it; dependents still run
    /// and may inspect the failure.
    FailureContinue,
    /// The node failed and the run will halt. Outgoing edges stay unresolved;
    /// the runner marks downstream nodes via `fail_downstream`.
    FailureHalt,
    /// The node was skipped; all outgoing edges are dead.
    Skipped,
}

/// Kahn-style topological progression over a `GraphModel`.
///
/// Maintains a frontier of ready nodes: nodes all of whose incoming edges
/// originate from completed (or pruned) predecessors. A node whose incoming
/// edges all resolved dead is skipped without execution, recursively.
///
/// Ties among simultaneously-ready nodes are broken by edge declaration
/// order, so the yielded order is deterministic for identical graphs.
pub struct ExecutionPlanner<'g> {
    graph: &'g GraphModel,
    /// Unresolved incoming edge count per node.
    pending: HashMap<String, usize>,
    /// Satisfied-live incoming edge count per node.
    live: HashMap<String, usize>,
    state: HashMap<String, NodeState>,
}

impl<'g> ExecutionPlanner<'g> {
    pub fn new(graph: &'g GraphModel) -> Self {
        let mut pending: HashMap<String, usize> = HashMap::new();
        let mut live: HashMap<String, usize> = HashMap::new();
        let mut state: HashMap<String, NodeState> = HashMap::new();

        for node in graph.nodes() {
            pending.insert(node.id.clone(), graph.incoming(&node.id).count());
            live.insert(node.id.clone(), 0);
            state.insert(node.id.clone(), NodeState::Pending);
        }
        state.insert(graph.entry_node_id().to_string(), NodeState::Ready);

        Self {
            graph,
            pending,
            live,
            state,
        }
    }

    /// All nodes ready right now, in deterministic order. Returned nodes are
    /// marked running; an empty batch means the run is over.
    pub fn next_batch(&mut self) -> Vec<String> {
        let mut batch: Vec<String> = self
            .state
            .iter()
            .filter(|(_, s)| **s == NodeState::Ready)
            .map(|(id, _)| id.clone())
            .collect();
        batch.sort_by_key(|id| self.graph.rank(id));

        for id in &batch {
            self.state.insert(id.clone(), NodeState::Running);
        }
        batch
    }

    /// Record a node's completion and resolve its outgoing edges.
    ///
    /// Returns the ids of nodes that transitioned to skipped as a result,
    /// in deterministic propagation order.
    pub fn record_completion(
        &mut self,
        node_id: &str,
        outcome: CompletionOutcome,
    ) -> Vec<String> {
        self.state.insert(node_id.to_string(), NodeState::Done);

        let mut skipped = Vec::new();
        match outcome {
            CompletionOutcome::Success { live_labels } => {
                self.resolve_outgoing(node_id, live_labels.as_deref(), &mut skipped);
            }
            CompletionOutcome::FailureContinue => {
                self.resolve_outgoing(node_id, None, &mut skipped);
            }
            CompletionOutcome::FailureHalt => {}
            CompletionOutcome::Skipped => {
                self.prune_outgoing(node_id, &mut skipped);
            }
        }
        skipped
    }

    /// Mark every not-yet-started node reachable from `node_id` as a
    /// dependency failure. Returns their ids in traversal order.
    pub fn fail_downstream(&mut self, node_id: &str) -> Vec<String> {
        let mut failed = Vec::new();
        let mut queue: Vec<String> = self
            .graph
            .outgoing(node_id)
            .map(|e| e.target.clone())
            .collect();

        while let Some(id) = queue.pop() {
            match self.state.get(&id) {
                Some(NodeState::Pending) | Some(NodeState::Ready) => {
                    self.state.insert(id.clone(), NodeState::Done);
                    queue.extend(self.graph.outgoing(&id).map(|e| e.target.clone()));
                    failed.push(id);
                }
                _ => {}
            }
        }
        failed.sort_by_key(|id| self.graph.rank(id));
        failed
    }

    /// Whether any node is still pending, ready, or running.
    pub fn has_unfinished(&self) -> bool {
        self.state.values().any(|s| *s != NodeState::Done)
    }

    /// Resolve outgoing edges of a completed node. An edge is live unless the
    /// node selected branch labels and the edge carries a non-selected label.
    fn resolve_outgoing(
        &mut self,
        node_id: &str,
        selected: Option<&[String]>,
        skipped: &mut Vec<String>,
    ) {
        let edges: Vec<(String, bool)> = self
            .graph
            .outgoing(node_id)
            .map(|e| {
                let is_live = match (&e.label, selected) {
                    (Some(label), Some(labels)) => labels.iter().any(|l| l == label),
                    // Unlabeled edges from a branching node stay live
                    _ => true,
                };
                (e.target.clone(), is_live)
            })
            .collect();

        for (target, is_live) in edges {
            self.resolve_edge(&target, is_live, skipped);
        }
    }

    /// Resolve all outgoing edges of a skipped node as dead.
    fn prune_outgoing(&mut self, node_id: &str, skipped: &mut Vec<String>) {
        let targets: Vec<String> = self
            .graph
            .outgoing(node_id)
            .map(|e| e.target.clone())
            .collect();
        for target in targets {
            self.resolve_edge(&target, false, skipped);
        }
    }

    fn resolve_edge(&mut self, target: &str, is_live: bool, skipped: &mut Vec<String>) {
        let pending = self
            .pending
            .get_mut(target)
            .expect("edge target must exist in validated graph");
        *pending = pending.saturating_sub(1);
        if is_live {
            *self.live.get_mut(target).expect("node tracked") += 1;
        }

        if *self.pending.get(target).unwrap() == 0
            && self.state.get(target) == Some(&NodeState::Pending)
        {
            if *self.live.get(target).unwrap() > 0 {
                self.state.insert(target.to_string(), NodeState::Ready);
            } else {
                // No live path reaches this node: skip without execution and
                // propagate through its own outgoing edges.
                debug!(node_id = %target, "Node unreachable via live edges, skipping");
                self.state.insert(target.to_string(), NodeState::Done);
                skipped.push(target.to_string());
                self.prune_outgoing(target, skipped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::loader::GraphLoader;
    use serde_json::json;

    fn load(nodes: serde_json::Value, edges: serde_json::Value) -> GraphModel {
        let known = ["input", "chat", "condition", "output"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        GraphLoader::new(known)
            .load(json!({"schemaVersion": "1", "nodes": nodes, "edges": edges}))
            .unwrap()
    }

    fn succeed() -> CompletionOutcome {
        CompletionOutcome::Success { live_labels: None }
    }

    #[test]
    fn test_linear_progression() {
        let g = load(
            json!([
                {"id": "in", "type": "input"},
                {"id": "a", "type": "chat"},
                {"id": "out", "type": "output"}
            ]),
            json!([
                {"source": "in", "target": "a"},
                {"source": "a", "target": "out"}
            ]),
        );
        let mut planner = ExecutionPlanner::new(&g);

        assert_eq!(planner.next_batch(), vec!["in"]);
        planner.record_completion("in", succeed());
        assert_eq!(planner.next_batch(), vec!["a"]);
        planner.record_completion("a", succeed());
        assert_eq!(planner.next_batch(), vec!["out"]);
        planner.record_completion("out", succeed());
        assert!(planner.next_batch().is_empty());
        assert!(!planner.has_unfinished());
    }

    #[test]
    fn test_diamond_batch_is_deterministic() {
        let g = load(
            json!([
                {"id": "in", "type": "input"},
                {"id": "left", "type": "chat"},
                {"id": "right", "type": "chat"},
                {"id": "out", "type": "output"}
            ]),
            json!([
                {"source": "in", "target": "right"},
                {"source": "in", "target": "left"},
                {"source": "right", "target": "out"},
                {"source": "left", "target": "out"}
            ]),
        );
        let mut planner = ExecutionPlanner::new(&g);
        planner.next_batch();
        planner.record_completion("in", succeed());

        // Edge declaration order puts "right" before "left"
        assert_eq!(planner.next_batch(), vec!["right", "left"]);
        planner.record_completion("right", succeed());
        // "out" still waits on "left"
        assert!(planner.next_batch().is_empty());
        planner.record_completion("left", succeed());
        assert_eq!(planner.next_batch(), vec!["out"]);
    }

    #[test]
    fn test_branch_pruning_skips_unselected_path() {
        let g = load(
            json!([
                {"id": "in", "type": "input"},
                {"id": "cond", "type": "condition"},
                {"id": "a", "type": "chat"},
                {"id": "b", "type": "chat"},
                {"id": "a2", "type": "chat"},
                {"id": "out", "type": "output"}
            ]),
            json!([
                {"source": "in", "target": "cond"},
                {"source": "cond", "target": "a", "conditionLabel": "a"},
                {"source": "cond", "target": "b", "conditionLabel": "b"},
                {"source": "a", "target": "a2"},
                {"source": "a2", "target": "out"},
                {"source": "b", "target": "out"}
            ]),
        );
        let mut planner = ExecutionPlanner::new(&g);
        planner.next_batch();
        planner.record_completion("in", succeed());
        assert_eq!(planner.next_batch(), vec!["cond"]);

        let skipped = planner.record_completion(
            "cond",
            CompletionOutcome::Success {
                live_labels: Some(vec!["b".into()]),
            },
        );
        // Branch "a" and its downstream chain skip without execution
        assert_eq!(skipped, vec!["a", "a2"]);

        assert_eq!(planner.next_batch(), vec!["b"]);
        planner.record_completion("b", succeed());
        // "out" runs: reachable via live branch "b"
        assert_eq!(planner.next_batch(), vec!["out"]);
    }

    #[test]
    fn test_skip_propagates_to_exclusively_dependent_nodes() {
        let g = load(
            json!([
                {"id": "in", "type": "input"},
                {"id": "cond", "type": "condition"},
                {"id": "a", "type": "chat"},
                {"id": "tail", "type": "output"}
            ]),
            json!([
                {"source": "in", "target": "cond"},
                {"source": "cond", "target": "a", "conditionLabel": "go"},
                {"source": "a", "target": "tail"}
            ]),
        );
        let mut planner = ExecutionPlanner::new(&g);
        planner.next_batch();
        planner.record_completion("in", succeed());
        planner.next_batch();

        let skipped = planner.record_completion(
            "cond",
            CompletionOutcome::Success {
                live_labels: Some(vec!["stop".into()]),
            },
        );
        assert_eq!(skipped, vec!["a", "tail"]);
        assert!(planner.next_batch().is_empty());
        assert!(!planner.has_unfinished());
    }

    #[test]
    fn test_fail_downstream_marks_unstarted_only() {
        let g = load(
            json!([
                {"id": "in", "type": "input"},
                {"id": "a", "type": "chat"},
                {"id": "b", "type": "chat"},
                {"id": "out", "type": "output"}
            ]),
            json!([
                {"source": "in", "target": "a"},
                {"source": "in", "target": "b"},
                {"source": "a", "target": "out"},
                {"source": "b", "target": "out"}
            ]),
        );
        let mut planner = ExecutionPlanner::new(&g);
        planner.next_batch();
        planner.record_completion("in", succeed());
        let batch = planner.next_batch();
        assert_eq!(batch, vec!["a", "b"]);

        // "a" fails with halt policy; "out" has not started
        planner.record_completion("a", CompletionOutcome::FailureHalt);
        let failed = planner.fail_downstream("a");
        assert_eq!(failed, vec!["out"]);
    }

    #[test]
    fn test_failure_continue_keeps_dependents_live() {
        let g = load(
            json!([
                {"id": "in", "type": "input"},
                {"id": "a", "type": "chat"},
                {"id": "out", "type": "output"}
            ]),
            json!([
                {"source": "in", "target": "a"},
                {"source": "a", "target": "out"}
            ]),
        );
        let mut planner = ExecutionPlanner::new(&g);
        planner.next_batch();
        planner.record_completion("in", succeed());
        planner.next_batch();
        planner.record_completion("a", CompletionOutcome::FailureContinue);
        assert_eq!(planner.next_batch(), vec!["out"]);
    }
}
