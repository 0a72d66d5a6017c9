//! Subgraph extraction: everything upstream and downstream of one node.
//!
//! The result is the induced subgraph over the union of the start node's
//! ancestors and descendants. Traversal keeps a visited set in each
//! direction, so cycles terminate. Positions are re-derived locally:
//! a node that is a leaf in the full graph may be the root here.

use std::collections::{HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::Serialize;

use crate::error::AnalyzeError;
use crate::snapshot::GraphDoc;

use super::DocGraph;

/// Kind of the synthetic root node; counts as `root` regardless of degree.
const CLUSTER_ROOT_KIND: &str = "Cluster";

/// How the start node is addressed.
#[derive(Debug, Clone)]
pub enum StartNode {
    /// Directly by stable id.
    Id(String),
    /// By attribute lookup; must match exactly one node.
    Lookup {
        kind: String,
        name: String,
        namespace: Option<String>,
    },
}

impl std::fmt::Display for StartNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartNode::Id(id) => write!(f, "{id}"),
            StartNode::Lookup {
                kind,
                name,
                namespace: Some(ns),
            } => write!(f, "{kind}/{name} in {ns}"),
            StartNode::Lookup { kind, name, .. } => write!(f, "{kind}/{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Root,
    Intermediate,
    Leaf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubgraphNode {
    pub id: String,
    pub attributes: std::collections::BTreeMap<String, String>,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<SubgraphNode>,
    pub edges: Vec<super::components::ComponentEdge>,
}

fn resolve_start(g: &DocGraph, start: &StartNode) -> Result<NodeIndex, AnalyzeError> {
    match start {
        StartNode::Id(id) => g.node_index(id).ok_or(AnalyzeError::StartNodeNotFound {
            wanted: id.clone(),
        }),
        StartNode::Lookup {
            kind,
            name,
            namespace,
        } => {
            let matches: Vec<NodeIndex> = g
                .graph
                .node_indices()
                .filter(|&idx| {
                    let node = &g.graph[idx];
                    node.attr("kind") == kind
                        && node.attr("name") == name
                        && namespace
                            .as_deref()
                            .is_none_or(|ns| node.attr("namespace") == ns)
                })
                .collect();
            match matches.len() {
                0 => Err(AnalyzeError::StartNodeNotFound {
                    wanted: start.to_string(),
                }),
                1 => Ok(matches[0]),
                count => Err(AnalyzeError::AmbiguousStartNode {
                    wanted: start.to_string(),
                    count,
                }),
            }
        }
    }
}

/// Breadth-first reachability in one direction, visited-set bounded.
fn reach(g: &DocGraph, start: NodeIndex, direction: Direction) -> HashSet<NodeIndex> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        for next in g.graph.neighbors_directed(current, direction) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

fn position(g: &DocGraph, idx: NodeIndex, members: &HashSet<NodeIndex>) -> Position {
    let local_in = g
        .graph
        .edges_directed(idx, Direction::Incoming)
        .filter(|e| members.contains(&e.source()))
        .count();
    let local_out = g
        .graph
        .edges_directed(idx, Direction::Outgoing)
        .filter(|e| members.contains(&e.target()))
        .count();

    if g.graph[idx].attr("kind") == CLUSTER_ROOT_KIND || local_in == 0 {
        Position::Root
    } else if local_out == 0 {
        Position::Leaf
    } else {
        Position::Intermediate
    }
}

/// Extract the ancestor/descendant subgraph around a start node.
pub fn extract(doc: &GraphDoc, start: &StartNode) -> Result<Subgraph, AnalyzeError> {
    let g = DocGraph::from_doc(doc);
    let start_idx = resolve_start(&g, start)?;

    let upward = reach(&g, start_idx, Direction::Incoming);
    let downward = reach(&g, start_idx, Direction::Outgoing);
    let members: HashSet<NodeIndex> = upward.union(&downward).copied().collect();
    tracing::debug!(
        upward = upward.len(),
        downward = downward.len(),
        total = members.len(),
        "subgraph membership resolved"
    );

    let mut nodes: Vec<SubgraphNode> = members
        .iter()
        .map(|&idx| {
            let node = &g.graph[idx];
            SubgraphNode {
                id: node.id.clone(),
                attributes: node.attributes.clone(),
                position: position(&g, idx, &members),
            }
        })
        .collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let edges: Vec<super::components::ComponentEdge> = g
        .graph
        .edge_references()
        .filter(|e| members.contains(&e.source()) && members.contains(&e.target()))
        .map(|e| super::components::ComponentEdge {
            source: g.graph[e.source()].id.clone(),
            target: g.graph[e.target()].id.clone(),
            attributes: e.weight().clone(),
        })
        .collect();

    Ok(Subgraph { nodes, edges })
}
