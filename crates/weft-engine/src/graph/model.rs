use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A node in the workflow graph. Constructed once by the loader, immutable
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: String,
    /// Discriminator selecting the handler for this node.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Handler-specific configuration bag. May reference secrets through the
    /// `env:` indirection marker.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Record the rendered request in the trace.
    #[serde(default)]
    pub log_requests: bool,
    /// Record the raw response in the trace.
    #[serde(default)]
    pub log_responses: bool,
    #[serde(default)]
    pub debug: bool,
    /// When true, a failure of this node does not halt the run.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// A directed dependency/data-flow link between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: String,
    pub target: String,
    /// Branch label for edges leaving a condition node.
    #[serde(default, rename = "conditionLabel")]
    pub label: Option<String>,
}

/// Validated, immutable in-memory representation of a workflow.
///
/// Edge order is significant: it is the deterministic tie-break for
/// simultaneously-ready nodes.
#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    schema_version: String,
    entry_node_id: String,
}

impl GraphModel {
    pub(crate) fn new(
        nodes: HashMap<String, Node>,
        edges: Vec<Edge>,
        schema_version: String,
        entry_node_id: String,
    ) -> Self {
        Self {
            nodes,
            edges,
            schema_version,
            entry_node_id,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn entry_node_id(&self) -> &str {
        &self.entry_node_id
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Incoming edges of a node, in declaration order.
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Ids of nodes marked as response payload ("output" type). Falls back to
    /// terminal nodes (no outgoing edges) when the graph designates none.
    pub fn output_node_ids(&self) -> Vec<&str> {
        let designated: Vec<&str> = self
            .nodes
            .values()
            .filter(|n| n.node_type == "output")
            .map(|n| n.id.as_str())
            .collect();
        if !designated.is_empty() {
            return designated;
        }
        self.nodes
            .values()
            .filter(|n| self.outgoing(&n.id).next().is_none())
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Deterministic ordering rank: the entry node ranks first, every other
    /// node by the declaration index of the first edge targeting it.
    pub fn rank(&self, id: &str) -> usize {
        if id == self.entry_node_id {
            return 0;
        }
        self.edges
            .iter()
            .position(|e| e.target == id)
            .map(|i| i + 1)
            .unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> GraphModel {
        let nodes: HashMap<String, Node> = ["in", "a", "b", "out"]
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    Node {
                        id: id.to_string(),
                        node_type: if *id == "out" { "output" } else { "input" }.into(),
                        parameters: serde_json::json!({}),
                        log_requests: false,
                        log_responses: false,
                        debug: false,
                        continue_on_error: false,
                    },
                )
            })
            .collect();
        let edges = vec![
            Edge { source: "in".into(), target: "a".into(), label: None },
            Edge { source: "in".into(), target: "b".into(), label: None },
            Edge { source: "a".into(), target: "out".into(), label: None },
            Edge { source: "b".into(), target: "out".into(), label: None },
        ];
        GraphModel::new(nodes, edges, "1".into(), "in".into())
    }

    #[test]
    fn test_outgoing_in_declaration_order() {
        let g = model();
        let targets: Vec<_> = g.outgoing("in").map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["a", "b"]);
    }

    #[test]
    fn test_rank_ordering() {
        let g = model();
        assert_eq!(g.rank("in"), 0);
        assert!(g.rank("a") < g.rank("b"));
        assert!(g.rank("b") < g.rank("out"));
    }

    #[test]
    fn test_output_node_ids_designated() {
        let g = model();
        assert_eq!(g.output_node_ids(), vec!["out"]);
    }

    #[test]
    fn test_node_deserialization_flags() {
        let node: Node = serde_json::from_value(serde_json::json!({
            "id": "n1",
            "type": "chat",
            "parameters": {"prompt": "{{input.text}}"},
            "logRequests": true,
            "continueOnError": true
        }))
        .unwrap();
        assert_eq!(node.node_type, "chat");
        assert!(node.log_requests);
        assert!(!node.log_responses);
        assert!(node.continue_on_error);
    }
}
