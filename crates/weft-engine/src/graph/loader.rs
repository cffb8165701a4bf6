use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::debug;

use weft_core::error::{Result, WeftError};

use super::model::{Edge, GraphModel, Node};

const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1"];

/// Raw graph configuration document, as produced by the workflow editor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDocument {
    schema_version: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// Parses raw configuration into a validated, immutable `GraphModel`.
///
/// Validates the schema version, node-id uniqueness, edge referential
/// integrity, entry-node uniqueness, known node types, and acyclicity.
/// Any violation fails with an error carrying the offending node/edge id;
/// no partial model is ever returned.
pub struct GraphLoader {
    known_types: HashSet<String>,
}

impl GraphLoader {
    pub fn new(known_types: HashSet<String>) -> Self {
        Self { known_types }
    }

    /// Load and validate a graph configuration document.
    pub fn load(&self, document: serde_json::Value) -> Result<GraphModel> {
        let doc: GraphDocument = serde_json::from_value(document).map_err(|e| {
            WeftError::Validation {
                entity: "document".into(),
                message: e.to_string(),
            }
        })?;

        if !SUPPORTED_SCHEMA_VERSIONS.contains(&doc.schema_version.as_str()) {
            return Err(WeftError::UnsupportedSchema(doc.schema_version));
        }

        // Node-id uniqueness
        let mut nodes: HashMap<String, Node> = HashMap::new();
        for node in doc.nodes {
            if nodes.contains_key(&node.id) {
                return Err(WeftError::Validation {
                    entity: node.id.clone(),
                    message: format!("duplicate node id '{}'", node.id),
                });
            }
            nodes.insert(node.id.clone(), node);
        }
        if nodes.is_empty() {
            return Err(WeftError::Validation {
                entity: "document".into(),
                message: "graph has no nodes".into(),
            });
        }

        // Unknown node types fail at load time, before any work is done
        for node in nodes.values() {
            if !self.known_types.contains(&node.node_type) {
                return Err(WeftError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                });
            }
        }

        // Edge referential integrity
        for edge in &doc.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !nodes.contains_key(endpoint) {
                    return Err(WeftError::Validation {
                        entity: format!("edge {}->{}", edge.source, edge.target),
                        message: format!("references unknown node '{}'", endpoint),
                    });
                }
            }
            if edge.source == edge.target {
                return Err(WeftError::Validation {
                    entity: format!("edge {}->{}", edge.source, edge.target),
                    message: "self-loop".into(),
                });
            }
        }

        // Exactly one entry node: no incoming edges, or explicitly the input
        // trigger; every other node must be reachable through some edge.
        let targets: HashSet<&str> = doc.edges.iter().map(|e| e.target.as_str()).collect();
        let mut entries: Vec<&str> = nodes
            .keys()
            .map(|s| s.as_str())
            .filter(|id| !targets.contains(id))
            .collect();
        entries.sort_unstable();
        let entry = match entries.as_slice() {
            [single] => single.to_string(),
            [] => {
                return Err(WeftError::Validation {
                    entity: "document".into(),
                    message: "no entry node: every node has an incoming edge".into(),
                })
            }
            multiple => {
                return Err(WeftError::Validation {
                    entity: multiple[0].to_string(),
                    message: format!(
                        "multiple entry nodes without incoming edges: {}",
                        multiple.join(", ")
                    ),
                })
            }
        };

        Self::check_acyclic(&nodes, &doc.edges)?;

        debug!(
            nodes = nodes.len(),
            edges = doc.edges.len(),
            entry = %entry,
            "Graph loaded"
        );
        Ok(GraphModel::new(nodes, doc.edges, doc.schema_version, entry))
    }

    /// Depth-first traversal with a recursion-stack cycle check.
    fn check_acyclic(nodes: &HashMap<String, Node>, edges: &[Edge]) -> Result<()> {
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in edges {
            outgoing
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        let mut ids: Vec<&str> = nodes.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();

        for id in ids {
            if !visited.contains(id) {
                Self::visit(id, &outgoing, &mut visited, &mut on_stack)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        id: &'a str,
        outgoing: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Result<()> {
        visited.insert(id);
        on_stack.insert(id);
        if let Some(next) = outgoing.get(id) {
            for &target in next {
                if on_stack.contains(target) {
                    return Err(WeftError::Validation {
                        entity: target.to_string(),
                        message: format!("cycle detected through node '{}'", target),
                    });
                }
                if !visited.contains(target) {
                    Self::visit(target, outgoing, visited, on_stack)?;
                }
            }
        }
        on_stack.remove(id);
        Ok(())
    }
}
