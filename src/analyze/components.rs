//! Disconnected-component analysis: split the topology into weakly
//! connected islands and classify each node's position in its island.

use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::Serialize;

use crate::snapshot::GraphDoc;

use super::{DocGraph, DocNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// No incoming edges (or isolated).
    Parent,
    Intermediate,
    Leaf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentNode {
    pub id: String,
    pub attributes: std::collections::BTreeMap<String, String>,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentEdge {
    pub source: String,
    pub target: String,
    pub attributes: std::collections::BTreeMap<String, String>,
}

/// One weakly connected component, nodes ordered parent → intermediate →
/// leaf and by name within a position.
#[derive(Debug, Clone, Serialize)]
pub struct Component {
    pub nodes: Vec<ComponentNode>,
    pub edges: Vec<ComponentEdge>,
}

fn position(in_degree: usize, out_degree: usize) -> Position {
    if in_degree == 0 {
        Position::Parent
    } else if out_degree > 0 {
        Position::Intermediate
    } else {
        Position::Leaf
    }
}

/// Split the document into weakly connected components.
pub fn analyze(doc: &GraphDoc) -> Vec<Component> {
    let g = DocGraph::from_doc(doc);

    // Union over edges ignoring direction gives the weak components.
    let mut union = UnionFind::new(g.graph.node_count());
    for edge in g.graph.edge_references() {
        union.union(edge.source().index(), edge.target().index());
    }

    let mut by_root: std::collections::BTreeMap<usize, Vec<petgraph::graph::NodeIndex>> =
        std::collections::BTreeMap::new();
    for idx in g.graph.node_indices() {
        by_root.entry(union.find(idx.index())).or_default().push(idx);
    }
    tracing::info!(components = by_root.len(), "found disconnected components");

    let mut result = Vec::with_capacity(by_root.len());
    for members in by_root.into_values() {
        let member_set: std::collections::HashSet<_> = members.iter().copied().collect();

        // Degrees within the component only. Since a weak component
        // contains every edge touching its members, these equal the
        // global degrees, but we stay explicit about the scope.
        let mut nodes: Vec<ComponentNode> = members
            .iter()
            .map(|&idx| {
                let node: &DocNode = &g.graph[idx];
                ComponentNode {
                    id: node.id.clone(),
                    attributes: node.attributes.clone(),
                    position: position(g.in_degree(idx), g.out_degree(idx)),
                }
            })
            .collect();
        nodes.sort_by(|a, b| {
            (a.position, a.attributes.get("name"))
                .cmp(&(b.position, b.attributes.get("name")))
        });

        let edges: Vec<ComponentEdge> = g
            .graph
            .edge_references()
            .filter(|e| member_set.contains(&e.source()))
            .map(|e| ComponentEdge {
                source: g.graph[e.source()].id.clone(),
                target: g.graph[e.target()].id.clone(),
                attributes: e.weight().clone(),
            })
            .collect();

        result.push(Component { nodes, edges });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{EdgeDoc, NodeDoc};
    use std::collections::BTreeMap;

    fn node(id: &str, kind: &str, name: &str) -> NodeDoc {
        NodeDoc {
            id: id.into(),
            attributes: BTreeMap::from([
                ("kind".into(), kind.into()),
                ("name".into(), name.into()),
            ]),
        }
    }

    fn edge(source: &str, target: &str) -> EdgeDoc {
        EdgeDoc {
            source: source.into(),
            target: target.into(),
            attributes: BTreeMap::from([("labels".into(), "[\"X_OWNS_Y\"]".into())]),
        }
    }

    #[test]
    fn splits_into_weak_components() {
        let doc = GraphDoc {
            nodes: vec![
                node("a", "Namespace", "default"),
                node("b", "ConfigMap", "settings"),
                node("c", "Node", "worker-1"),
            ],
            edges: vec![edge("a", "b")],
        };
        let components = analyze(&doc);
        assert_eq!(components.len(), 2);

        let sizes: Vec<usize> = components.iter().map(|c| c.nodes.len()).collect();
        assert!(sizes.contains(&2));
        assert!(sizes.contains(&1));
    }

    #[test]
    fn positions_and_ordering() {
        let doc = GraphDoc {
            nodes: vec![
                node("root", "Cluster", "cluster"),
                node("mid", "Namespace", "default"),
                node("leaf", "ConfigMap", "settings"),
            ],
            edges: vec![edge("root", "mid"), edge("mid", "leaf")],
        };
        let components = analyze(&doc);
        assert_eq!(components.len(), 1);

        let nodes = &components[0].nodes;
        assert_eq!(nodes[0].position, Position::Parent);
        assert_eq!(nodes[0].id, "root");
        assert_eq!(nodes[1].position, Position::Intermediate);
        assert_eq!(nodes[2].position, Position::Leaf);
    }

    #[test]
    fn isolated_node_is_parent() {
        let doc = GraphDoc {
            nodes: vec![node("solo", "Node", "worker-1")],
            edges: vec![],
        };
        let components = analyze(&doc);
        assert_eq!(components[0].nodes[0].position, Position::Parent);
    }

    #[test]
    fn placeholder_lands_in_its_edges_component() {
        let doc = GraphDoc {
            nodes: vec![node("a", "Pod", "web-0")],
            edges: vec![edge("a", "ghost")],
        };
        let components = analyze(&doc);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].nodes.len(), 2);
        let ghost = components[0]
            .nodes
            .iter()
            .find(|n| n.id == "ghost")
            .unwrap();
        assert_eq!(ghost.attributes["kind"], "Unknown");
        assert_eq!(ghost.position, Position::Leaf);
    }
}
