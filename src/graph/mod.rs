//! Topology graph: petgraph-backed directed graph with a stable-id index.
//!
//! Nodes carry [`NodeAttrs`], edges carry [`EdgeAttrs`]. A pair of nodes has
//! at most one edge record; multiple relationship kinds between the same pair
//! merge into that edge's label set. [`TopologyGraph`] is not internally
//! locked — the Topology Manager serializes all access behind its single
//! mutation lock, and the full-rebuild path builds a fresh graph off-lock and
//! swaps it in atomically.

pub mod build;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::resource::{ResourceKey, stable_id};

/// Seconds since the UNIX epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Attributes stored on every graph node.
///
/// The well-known fields cover every backed cluster object; synthetic nodes
/// (cluster root, ports) and vendor-specific data use the open `extra`
/// side-table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttrs {
    /// Deterministic stable id; the graph's node key.
    pub id: String,
    pub kind: String,
    pub group: String,
    pub version: String,
    /// Namespace, or "" for cluster-scoped and synthetic nodes.
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub uid: String,
    /// When this node was last observed (seconds since UNIX epoch).
    pub last_seen: u64,
    /// Free-form string-keyed side-table for anything without a field.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl NodeAttrs {
    /// Build attributes for a resource key with the current timestamp.
    pub fn from_key(key: &ResourceKey) -> Self {
        Self {
            id: stable_id(key),
            kind: key.kind.clone(),
            group: key.group.clone(),
            version: key.version.clone(),
            namespace: key.namespace.clone().unwrap_or_default(),
            name: key.name.clone(),
            labels: BTreeMap::new(),
            uid: String::new(),
            last_seen: unix_now(),
            extra: BTreeMap::new(),
        }
    }

    /// The composite key this node was derived from.
    pub fn key(&self) -> ResourceKey {
        let namespace = if self.namespace.is_empty() {
            None
        } else {
            Some(self.namespace.clone())
        };
        ResourceKey::new(
            self.group.clone(),
            self.version.clone(),
            self.kind.clone(),
            namespace,
            self.name.clone(),
        )
    }
}

/// Attributes stored on every edge: the relationship label set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttrs {
    /// Relationship types between the pair; a set, so never a duplicate.
    pub labels: BTreeSet<String>,
    /// When this edge was last observed.
    pub last_seen: u64,
}

/// A materialized edge, for export and iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeView {
    pub source: String,
    pub target: String,
    pub attrs: EdgeAttrs,
}

/// Directed topology graph with O(1) stable-id lookups.
#[derive(Debug, Default)]
pub struct TopologyGraph {
    graph: DiGraph<NodeAttrs, EdgeAttrs>,
    index: HashMap<String, NodeIndex>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a node.
    ///
    /// On repeat observation the attributes are overwritten and `last_seen`
    /// is bumped; the node keeps its edges.
    pub fn upsert_node(&mut self, attrs: NodeAttrs) -> String {
        let id = attrs.id.clone();
        match self.index.get(&id) {
            Some(&idx) => {
                self.graph[idx] = attrs;
            }
            None => {
                let idx = self.graph.add_node(attrs);
                self.index.insert(id.clone(), idx);
            }
        }
        id
    }

    /// Merge a relationship label into the edge from `source` to `target`.
    ///
    /// Creates the edge on first call; inserting a label that is already
    /// present is a no-op for the set. Returns false (and adds nothing) when
    /// either endpoint is absent — the live graph never holds dangling edges.
    pub fn merge_edge(&mut self, source: &str, target: &str, label: &str) -> bool {
        let (Some(&src), Some(&dst)) = (self.index.get(source), self.index.get(target)) else {
            return false;
        };
        let now = unix_now();
        match self.graph.find_edge(src, dst) {
            Some(edge) => {
                let attrs = &mut self.graph[edge];
                attrs.labels.insert(label.to_string());
                attrs.last_seen = now;
            }
            None => {
                let mut labels = BTreeSet::new();
                labels.insert(label.to_string());
                self.graph.add_edge(
                    src,
                    dst,
                    EdgeAttrs {
                        labels,
                        last_seen: now,
                    },
                );
            }
        }
        true
    }

    /// Remove a node (and its edges) by stable id. Returns the removed attrs.
    pub fn remove_node(&mut self, id: &str) -> Option<NodeAttrs> {
        let idx = self.index.remove(id)?;
        let removed = self.graph.remove_node(idx);
        // petgraph swaps the last node into the vacated index; repair the map.
        if let Some(moved) = self.graph.node_weight(idx) {
            self.index.insert(moved.id.clone(), idx);
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&NodeAttrs> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Mutable access to an existing edge's attributes.
    pub fn edge_mut(&mut self, source: &str, target: &str) -> Option<&mut EdgeAttrs> {
        let src = *self.index.get(source)?;
        let dst = *self.index.get(target)?;
        let idx = self.graph.find_edge(src, dst)?;
        self.graph.edge_weight_mut(idx)
    }

    /// Number of incoming edges for a node; 0 if the node is absent.
    pub fn in_degree(&self, id: &str) -> usize {
        match self.index.get(id) {
            Some(&idx) => self
                .graph
                .edges_directed(idx, Direction::Incoming)
                .count(),
            None => 0,
        }
    }

    pub fn out_degree(&self, id: &str) -> usize {
        match self.index.get(id) {
            Some(&idx) => self
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .count(),
            None => 0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All nodes, in arbitrary order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeAttrs> {
        self.graph.node_weights()
    }

    /// All edges as (source id, target id, attrs) views.
    pub fn edges(&self) -> impl Iterator<Item = EdgeView> + '_ {
        self.graph.edge_references().map(|e| EdgeView {
            source: self.graph[e.source()].id.clone(),
            target: self.graph[e.target()].id.clone(),
            attrs: e.weight().clone(),
        })
    }

    /// Stable ids of nodes whose `last_seen` is older than the cutoff.
    pub fn nodes_older_than(&self, cutoff: u64) -> Vec<String> {
        self.graph
            .node_weights()
            .filter(|n| n.last_seen < cutoff)
            .map(|n| n.id.clone())
            .collect()
    }
}
