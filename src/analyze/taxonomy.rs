//! Kind-level taxonomy: collapse the instance graph into one node per
//! resource kind, counting instances and per-relationship-type edges.

use std::collections::BTreeMap;

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use serde::Serialize;

use crate::snapshot::GraphDoc;

use super::{DocGraph, edge_label_list};

#[derive(Debug, Clone, Serialize)]
pub struct RelCount {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindEntry {
    pub instance_count: u64,
    /// "Namespaced" or "Cluster".
    pub scope: String,
    /// target kind -> relationship types toward it.
    pub outgoing_relationships: BTreeMap<String, Vec<RelCount>>,
    /// source kind -> relationship types from it.
    pub incoming_relationships: BTreeMap<String, Vec<RelCount>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindRelationship {
    pub source_kind: String,
    pub target_kind: String,
    /// relationship type -> occurrence count.
    pub relationships: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_kinds: usize,
    pub total_relationships: usize,
    pub namespaced_kinds: usize,
    pub cluster_scoped_kinds: usize,
}

/// The structured taxonomy summary.
#[derive(Debug, Clone, Serialize)]
pub struct Taxonomy {
    pub resource_kinds: BTreeMap<String, KindEntry>,
    pub relationships: Vec<KindRelationship>,
    pub statistics: Statistics,
}

struct KindProps {
    count: u64,
    namespaced: bool,
    // target kind -> rel type -> count
    outgoing: BTreeMap<String, BTreeMap<String, u64>>,
}

fn collect_kinds(g: &DocGraph) -> BTreeMap<String, KindProps> {
    let mut kinds: BTreeMap<String, KindProps> = BTreeMap::new();

    for idx in g.graph.node_indices() {
        let node = &g.graph[idx];
        let kind = node.attr("kind");
        if kind.is_empty() {
            continue;
        }
        let entry = kinds.entry(kind.to_string()).or_insert_with(|| KindProps {
            count: 0,
            namespaced: false,
            outgoing: BTreeMap::new(),
        });
        entry.count += 1;
        if !node.attr("namespace").is_empty() {
            entry.namespaced = true;
        }
    }

    for edge in g.graph.edge_references() {
        let source_kind = g.graph[edge.source()].attr("kind").to_string();
        let target_kind = g.graph[edge.target()].attr("kind").to_string();
        if source_kind.is_empty() || target_kind.is_empty() {
            continue;
        }
        let Some(props) = kinds.get_mut(&source_kind) else {
            continue;
        };
        let per_target = props.outgoing.entry(target_kind).or_default();
        for label in edge_label_list(edge.weight()) {
            *per_target.entry(label).or_insert(0) += 1;
        }
    }
    kinds
}

/// Build the structured taxonomy from an exported graph document.
pub fn build(doc: &GraphDoc) -> Taxonomy {
    let g = DocGraph::from_doc(doc);
    let kinds = collect_kinds(&g);

    let mut resource_kinds: BTreeMap<String, KindEntry> = kinds
        .iter()
        .map(|(kind, props)| {
            (
                kind.clone(),
                KindEntry {
                    instance_count: props.count,
                    scope: if props.namespaced {
                        "Namespaced".into()
                    } else {
                        "Cluster".into()
                    },
                    outgoing_relationships: BTreeMap::new(),
                    incoming_relationships: BTreeMap::new(),
                },
            )
        })
        .collect();

    let mut relationships = Vec::new();
    for (source_kind, props) in &kinds {
        for (target_kind, rel_counts) in &props.outgoing {
            relationships.push(KindRelationship {
                source_kind: source_kind.clone(),
                target_kind: target_kind.clone(),
                relationships: rel_counts.clone(),
            });

            for (rel_type, &count) in rel_counts {
                if let Some(entry) = resource_kinds.get_mut(source_kind) {
                    entry
                        .outgoing_relationships
                        .entry(target_kind.clone())
                        .or_default()
                        .push(RelCount {
                            rel_type: rel_type.clone(),
                            count,
                        });
                }
                if let Some(entry) = resource_kinds.get_mut(target_kind) {
                    entry
                        .incoming_relationships
                        .entry(source_kind.clone())
                        .or_default()
                        .push(RelCount {
                            rel_type: rel_type.clone(),
                            count,
                        });
                }
            }
        }
    }

    let namespaced = resource_kinds
        .values()
        .filter(|entry| entry.scope == "Namespaced")
        .count();
    let statistics = Statistics {
        total_kinds: resource_kinds.len(),
        total_relationships: relationships.len(),
        namespaced_kinds: namespaced,
        cluster_scoped_kinds: resource_kinds.len() - namespaced,
    };

    Taxonomy {
        resource_kinds,
        relationships,
        statistics,
    }
}

/// Render the kind graph as Graphviz DOT. Node labels carry instance
/// counts, edge labels the per-relationship-type counts.
pub fn render_dot(doc: &GraphDoc) -> String {
    let g = DocGraph::from_doc(doc);
    let kinds = collect_kinds(&g);

    let mut kind_graph: DiGraph<String, String> = DiGraph::new();
    let mut index = BTreeMap::new();
    for (kind, props) in &kinds {
        let label = format!("{kind}\n({} instances)", props.count);
        index.insert(kind.clone(), kind_graph.add_node(label));
    }
    for (source_kind, props) in &kinds {
        for (target_kind, rel_counts) in &props.outgoing {
            let (Some(&s), Some(&t)) = (index.get(source_kind), index.get(target_kind)) else {
                continue;
            };
            let label = rel_counts
                .iter()
                .map(|(rel, count)| format!("{rel}: {count}"))
                .collect::<Vec<_>>()
                .join("\n");
            kind_graph.add_edge(s, t, label);
        }
    }

    format!("{}", petgraph::dot::Dot::new(&kind_graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{EdgeDoc, NodeDoc};

    fn node(id: &str, kind: &str, ns: &str) -> NodeDoc {
        NodeDoc {
            id: id.into(),
            attributes: BTreeMap::from([
                ("kind".into(), kind.into()),
                ("name".into(), id.into()),
                ("namespace".into(), ns.into()),
            ]),
        }
    }

    fn edge(source: &str, target: &str, label: &str) -> EdgeDoc {
        EdgeDoc {
            source: source.into(),
            target: target.into(),
            attributes: BTreeMap::from([(
                "labels".into(),
                format!("[\"{label}\"]"),
            )]),
        }
    }

    fn doc() -> GraphDoc {
        GraphDoc {
            nodes: vec![
                node("ns", "Namespace", ""),
                node("pod1", "Pod", "default"),
                node("pod2", "Pod", "default"),
                node("svc", "Service", "default"),
            ],
            edges: vec![
                edge("svc", "pod1", "SERVICE_SELECTS_POD"),
                edge("svc", "pod2", "SERVICE_SELECTS_POD"),
                edge("ns", "svc", "NAMESPACE_OWNS_SERVICE"),
            ],
        }
    }

    #[test]
    fn counts_and_scopes() {
        let taxonomy = build(&doc());
        assert_eq!(taxonomy.resource_kinds["Pod"].instance_count, 2);
        assert_eq!(taxonomy.resource_kinds["Pod"].scope, "Namespaced");
        assert_eq!(taxonomy.resource_kinds["Namespace"].scope, "Cluster");
        assert_eq!(taxonomy.statistics.total_kinds, 3);
        assert_eq!(taxonomy.statistics.namespaced_kinds, 2);
        assert_eq!(taxonomy.statistics.cluster_scoped_kinds, 1);
    }

    #[test]
    fn relationship_counts_aggregate_instances() {
        let taxonomy = build(&doc());
        let svc_pod = taxonomy
            .relationships
            .iter()
            .find(|r| r.source_kind == "Service" && r.target_kind == "Pod")
            .unwrap();
        assert_eq!(svc_pod.relationships["SERVICE_SELECTS_POD"], 2);

        let incoming = &taxonomy.resource_kinds["Pod"].incoming_relationships["Service"];
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].count, 2);
    }

    #[test]
    fn dot_output_contains_kinds_and_labels() {
        let dot = render_dot(&doc());
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("Pod"));
        assert!(dot.contains("2 instances"));
        assert!(dot.contains("SERVICE_SELECTS_POD: 2"));
    }
}
