//! Topology Analysis Toolkit: offline transforms over exported graph
//! documents.
//!
//! Analyzers never touch the live graph; they consume the snapshot
//! document shape (`GraphDoc`), the same JSON `GET /graph` serves. Where
//! the live graph refuses dangling edges, the analyzers tolerate them:
//! an edge endpoint missing from the node list is synthesized as an
//! `Unknown` placeholder and flagged, never fatal, so a truncated or
//! hand-edited export still analyzes.

pub mod components;
pub mod subgraph;
pub mod taxonomy;

use std::collections::{BTreeMap, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::snapshot::GraphDoc;

/// One node as the analyzers see it: stable id plus the stringified
/// attribute table from the document.
#[derive(Debug, Clone)]
pub struct DocNode {
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

impl DocNode {
    pub fn attr(&self, key: &str) -> &str {
        self.attributes.get(key).map(String::as_str).unwrap_or("")
    }
}

/// In-memory form of a graph document, with placeholder synthesis.
pub struct DocGraph {
    pub graph: DiGraph<DocNode, BTreeMap<String, String>>,
    index: HashMap<String, NodeIndex>,
}

impl DocGraph {
    pub fn from_doc(doc: &GraphDoc) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &doc.nodes {
            let idx = graph.add_node(DocNode {
                id: node.id.clone(),
                attributes: node.attributes.clone(),
            });
            index.insert(node.id.clone(), idx);
        }

        let mut missing = 0usize;
        for edge in &doc.edges {
            let source = Self::intern(&mut graph, &mut index, &edge.source, &mut missing);
            let target = Self::intern(&mut graph, &mut index, &edge.target, &mut missing);
            graph.add_edge(source, target, edge.attributes.clone());
        }
        if missing > 0 {
            tracing::warn!(
                missing,
                "edges referenced nodes absent from the document; placeholders added"
            );
        }

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "analysis graph built"
        );
        Self { graph, index }
    }

    fn intern(
        graph: &mut DiGraph<DocNode, BTreeMap<String, String>>,
        index: &mut HashMap<String, NodeIndex>,
        id: &str,
        missing: &mut usize,
    ) -> NodeIndex {
        if let Some(&idx) = index.get(id) {
            return idx;
        }
        tracing::warn!(id, "edge references missing node");
        *missing += 1;
        let mut attributes = BTreeMap::new();
        attributes.insert("kind".into(), "Unknown".into());
        attributes.insert("name".into(), format!("missing-{id}"));
        let idx = graph.add_node(DocNode {
            id: id.into(),
            attributes,
        });
        index.insert(id.into(), idx);
        idx
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn in_degree(&self, idx: NodeIndex) -> usize {
        self.graph.neighbors_directed(idx, Direction::Incoming).count()
    }

    pub fn out_degree(&self, idx: NodeIndex) -> usize {
        self.graph.neighbors_directed(idx, Direction::Outgoing).count()
    }
}

/// Relationship labels carried on an exported edge. The attribute holds
/// a JSON array of label strings; anything unreadable degrades to a
/// single `UNKNOWN` entry rather than failing the analysis.
pub fn edge_label_list(attributes: &BTreeMap<String, String>) -> Vec<String> {
    attributes
        .get("labels")
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .filter(|labels| !labels.is_empty())
        .unwrap_or_else(|| vec!["UNKNOWN".into()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{EdgeDoc, NodeDoc};

    fn doc() -> GraphDoc {
        GraphDoc {
            nodes: vec![NodeDoc {
                id: "aaa".into(),
                attributes: BTreeMap::from([
                    ("kind".into(), "Pod".into()),
                    ("name".into(), "web-0".into()),
                ]),
            }],
            edges: vec![EdgeDoc {
                source: "aaa".into(),
                target: "bbb".into(),
                attributes: BTreeMap::from([(
                    "labels".into(),
                    "[\"POD_MOUNTS_CONFIGMAP\"]".into(),
                )]),
            }],
        }
    }

    #[test]
    fn missing_endpoint_becomes_placeholder() {
        let g = DocGraph::from_doc(&doc());
        assert_eq!(g.graph.node_count(), 2);
        assert_eq!(g.graph.edge_count(), 1);

        let idx = g.node_index("bbb").unwrap();
        let node = &g.graph[idx];
        assert_eq!(node.attr("kind"), "Unknown");
        assert_eq!(node.attr("name"), "missing-bbb");
    }

    #[test]
    fn label_parsing_degrades_to_unknown() {
        let labels = edge_label_list(&BTreeMap::from([(
            "labels".into(),
            "[\"A\", \"B\"]".into(),
        )]));
        assert_eq!(labels, vec!["A".to_string(), "B".to_string()]);

        let fallback = edge_label_list(&BTreeMap::from([("labels".into(), "oops".into())]));
        assert_eq!(fallback, vec!["UNKNOWN".to_string()]);

        let empty = edge_label_list(&BTreeMap::new());
        assert_eq!(empty, vec!["UNKNOWN".to_string()]);
    }
}
