//! Graph Builder: derive the full relationship graph from a record set.
//!
//! The build runs in a fixed phase order because later phases depend on nodes
//! and edges already present from earlier ones:
//!
//! 1. cluster root node
//! 2. one node per record (no edges yet)
//! 3. ownership edges + default-ownership fallback
//! 4. runtime edges (Pod → Node placement)
//! 5. network edges (Service/Pod/Port/Endpoints)
//! 6. volume edges (PV → PVC binding)
//! 7. mount edges (Pod → ConfigMap/Secret/PVC)
//!
//! Edges whose endpoint is missing from the node set are skipped; the live
//! graph never holds dangling edges. Port nodes are synthetic and exempt from
//! the ownership fallback.

use std::collections::HashMap;

use serde_json::Value;

use crate::resource::{ResourceKey, ResourceRecord, is_cluster_scoped, stable_id};

use super::{NodeAttrs, TopologyGraph};

/// Kinds whose ownership is established by network-edge inference in phase 5
/// rather than the phase-3 fallback.
const NETWORK_OWNED_KINDS: &[&str] = &["Endpoints", "EndpointSlice"];

/// Builds a complete [`TopologyGraph`] from collected records.
pub struct GraphBuilder;

impl GraphBuilder {
    /// Build the graph. Deterministic: identical record sets produce
    /// identical nodes, edges, and label sets.
    pub fn build(records: &HashMap<String, ResourceRecord>) -> TopologyGraph {
        let mut graph = TopologyGraph::new();

        // Sorted ids so every pass visits records in a stable order.
        let mut ids: Vec<&String> = records.keys().collect();
        ids.sort();

        let root_id = create_cluster_root(&mut graph);

        for id in &ids {
            create_node(&mut graph, &records[*id]);
        }

        create_ownership_edges(&mut graph, records, &ids, &root_id);
        create_runtime_edges(&mut graph, records, &ids);
        create_network_edges(&mut graph, records, &ids);
        create_volume_edges(&mut graph, records, &ids);
        create_mount_edges(&mut graph, records, &ids);

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "graph build complete"
        );
        graph
    }
}

/// Phase 1: the synthetic root. Its uid is its own stable id.
pub fn create_cluster_root(graph: &mut TopologyGraph) -> String {
    let key = ResourceKey::cluster_root();
    let mut attrs = NodeAttrs::from_key(&key);
    attrs.uid = attrs.id.clone();
    graph.upsert_node(attrs)
}

/// Phase 2: one node per record.
fn create_node(graph: &mut TopologyGraph, record: &ResourceRecord) -> String {
    let mut attrs = NodeAttrs::from_key(&record.key());
    attrs.labels = record.labels.clone();
    attrs.uid = record.uid.clone();
    graph.upsert_node(attrs)
}

/// Phase 3: ownership edges, then the default-ownership fallback.
fn create_ownership_edges(
    graph: &mut TopologyGraph,
    records: &HashMap<String, ResourceRecord>,
    ids: &[&String],
    root_id: &str,
) {
    for id in ids {
        let record = &records[*id];
        let node_id = record.stable_id();

        for owner in &record.owner_refs {
            let owner_id = stable_id(&record.owner_key(owner));
            let label = format!(
                "{}_OWNS_{}",
                owner.kind.to_uppercase(),
                record.kind.to_uppercase()
            );
            graph.merge_edge(&owner_id, &node_id, &label);
        }

        if graph.in_degree(&node_id) > 0 {
            continue;
        }

        // Fallback: nothing owns this record yet.
        if is_cluster_scoped(&record.kind) || record.namespace.is_none() {
            graph.merge_edge(root_id, &node_id, "CLUSTER_OWN_RESOURCE");
        } else if !NETWORK_OWNED_KINDS.contains(&record.kind.as_str()) {
            let ns = record.namespace.as_deref().unwrap_or_default();
            let ns_id = stable_id(&ResourceKey::namespace(ns));
            let label = format!("NAMESPACE_OWNS_{}", record.kind.to_uppercase());
            graph.merge_edge(&ns_id, &node_id, &label);
        }
    }
}

/// Phase 4: Pod → Node placement.
fn create_runtime_edges(
    graph: &mut TopologyGraph,
    records: &HashMap<String, ResourceRecord>,
    ids: &[&String],
) {
    for id in ids {
        let record = &records[*id];
        if record.kind != "Pod" {
            continue;
        }
        let Some(node_name) = record.spec.get("nodeName").and_then(Value::as_str) else {
            continue;
        };
        let node_key = ResourceKey::new("", "v1", "Node", None, node_name);
        graph.merge_edge(&stable_id(&node_key), &record.stable_id(), "NODE_RUNS_POD");
    }
}

/// Phase 5: Service selection, Port nodes, and Endpoints inference.
fn create_network_edges(
    graph: &mut TopologyGraph,
    records: &HashMap<String, ResourceRecord>,
    ids: &[&String],
) {
    create_service_edges(graph, records, ids);
    create_endpoint_edges(graph, records, ids);
}

fn create_service_edges(
    graph: &mut TopologyGraph,
    records: &HashMap<String, ResourceRecord>,
    ids: &[&String],
) {
    for id in ids {
        let service = &records[*id];
        if service.kind != "Service" {
            continue;
        }
        let service_id = service.stable_id();

        if let Some(selector) = service.spec.get("selector").and_then(Value::as_object)
            && !selector.is_empty()
        {
            for pod_id in ids {
                let pod = &records[*pod_id];
                if pod.kind != "Pod" || pod.namespace != service.namespace {
                    continue;
                }
                let matches = selector.iter().all(|(k, v)| {
                    v.as_str()
                        .is_some_and(|v| pod.labels.get(k).map(String::as_str) == Some(v))
                });
                if matches {
                    graph.merge_edge(&service_id, &pod.stable_id(), "SERVICE_SELECTS_POD");
                }
            }
        }

        for port in service.spec.get("ports").and_then(Value::as_array).into_iter().flatten() {
            let port_id = create_port_node(
                graph,
                service.namespace.as_deref().unwrap_or_default(),
                &port_node_name(&service.name, port),
                port,
            );
            graph.merge_edge(&service_id, &port_id, "SERVICE_OWNS_PORT");
        }
    }
}

fn create_endpoint_edges(
    graph: &mut TopologyGraph,
    records: &HashMap<String, ResourceRecord>,
    ids: &[&String],
) {
    for id in ids {
        let endpoints = &records[*id];
        if endpoints.kind != "Endpoints" {
            continue;
        }
        let endpoints_id = endpoints.stable_id();
        let namespace = endpoints.namespace.as_deref().unwrap_or_default();

        // Endpoints share their name with the Service they belong to.
        let service_key = ResourceKey::new(
            "",
            "v1",
            "Service",
            endpoints.namespace.clone(),
            endpoints.name.clone(),
        );
        let service_id = stable_id(&service_key);
        graph.merge_edge(&service_id, &endpoints_id, "SERVICE_HAS_ENDPOINTS");

        for subset in endpoints
            .spec
            .get("subsets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            for address in subset.get("addresses").and_then(Value::as_array).into_iter().flatten() {
                let Some(target) = address.get("targetRef") else {
                    continue;
                };
                if target.get("kind").and_then(Value::as_str) != Some("Pod") {
                    continue;
                }
                let Some(pod_name) = target.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let pod_key = ResourceKey::new(
                    "",
                    "v1",
                    "Pod",
                    endpoints.namespace.clone(),
                    pod_name,
                );
                let pod_id = stable_id(&pod_key);
                if !graph.merge_edge(&endpoints_id, &pod_id, "ENDPOINTS_TARGET_POD") {
                    continue;
                }

                for port in subset.get("ports").and_then(Value::as_array).into_iter().flatten() {
                    let pod_port_id = create_port_node(
                        graph,
                        namespace,
                        &port_node_name(pod_name, port),
                        port,
                    );
                    let service_port_id = create_port_node(
                        graph,
                        namespace,
                        &port_node_name(&endpoints.name, port),
                        port,
                    );
                    graph.merge_edge(&pod_id, &pod_port_id, "POD_OWNS_PORT");
                    graph.merge_edge(&service_id, &service_port_id, "SERVICE_OWNS_PORT");
                    graph.merge_edge(&service_port_id, &pod_port_id, "SERVICE_TARGETS_PORT");
                }
            }
        }
    }
}

/// Phase 6: PV → PVC binding from spec.claimRef.
fn create_volume_edges(
    graph: &mut TopologyGraph,
    records: &HashMap<String, ResourceRecord>,
    ids: &[&String],
) {
    for id in ids {
        let pv = &records[*id];
        if pv.kind != "PersistentVolume" {
            continue;
        }
        let Some(claim) = pv.spec.get("claimRef") else {
            continue;
        };
        let Some(name) = claim.get("name").and_then(Value::as_str) else {
            continue;
        };
        let namespace = claim.get("namespace").and_then(Value::as_str).map(String::from);
        let pvc_key = ResourceKey::new("", "v1", "PersistentVolumeClaim", namespace, name);
        graph.merge_edge(&pv.stable_id(), &stable_id(&pvc_key), "PV_BOUND_TO_PVC");
    }
}

/// Phase 7: Pod mounts from spec.volumes.
fn create_mount_edges(
    graph: &mut TopologyGraph,
    records: &HashMap<String, ResourceRecord>,
    ids: &[&String],
) {
    for id in ids {
        let pod = &records[*id];
        if pod.kind != "Pod" {
            continue;
        }
        let pod_id = pod.stable_id();

        for volume in pod.spec.get("volumes").and_then(Value::as_array).into_iter().flatten() {
            let mounts = [
                ("configMap", "name", "ConfigMap", "POD_MOUNTS_CONFIGMAP"),
                ("secret", "secretName", "Secret", "POD_MOUNTS_SECRET"),
                (
                    "persistentVolumeClaim",
                    "claimName",
                    "PersistentVolumeClaim",
                    "POD_MOUNTS_PVC",
                ),
            ];
            for (source_field, name_field, kind, label) in mounts {
                let Some(name) = volume
                    .get(source_field)
                    .and_then(|v| v.get(name_field))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let key = ResourceKey::new("", "v1", kind, pod.namespace.clone(), name);
                graph.merge_edge(&pod_id, &stable_id(&key), label);
            }
        }
    }
}

/// Port number as plain digits. Manifests carry both numeric and
/// string-typed ports; `Value::to_string` would quote the latter.
fn port_number(port: &Value) -> String {
    match port.get("port") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

/// "{owner}-{port}-{protocol}" name for a synthetic Port node.
fn port_node_name(owner_name: &str, port: &Value) -> String {
    let number = port_number(port);
    let protocol = port
        .get("protocol")
        .and_then(Value::as_str)
        .unwrap_or("TCP");
    format!("{owner_name}-{number}-{protocol}")
}

/// Create (or reuse) a synthetic Port node. Port nodes have no backing
/// cluster object and never receive fallback ownership.
pub fn create_port_node(
    graph: &mut TopologyGraph,
    namespace: &str,
    name: &str,
    port: &Value,
) -> String {
    let key = ResourceKey::new("", "v1", "Port", Some(namespace.to_string()), name);
    let id = stable_id(&key);
    if graph.contains(&id) {
        return id;
    }
    let mut attrs = NodeAttrs::from_key(&key);
    let number = port_number(port);
    if !number.is_empty() {
        attrs.extra.insert("port".into(), number);
    }
    attrs.extra.insert(
        "protocol".into(),
        port.get("protocol")
            .and_then(Value::as_str)
            .unwrap_or("TCP")
            .to_string(),
    );
    graph.upsert_node(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::OwnerRef;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(
        kind: &str,
        ns: Option<&str>,
        name: &str,
        spec: serde_json::Value,
    ) -> ResourceRecord {
        ResourceRecord {
            group: String::new(),
            version: "v1".into(),
            kind: kind.into(),
            namespace: ns.map(String::from),
            name: name.into(),
            owner_refs: vec![],
            labels: BTreeMap::new(),
            spec,
            status: Value::Null,
            uid: format!("uid-{name}"),
        }
    }

    fn records(list: Vec<ResourceRecord>) -> HashMap<String, ResourceRecord> {
        list.into_iter().map(|r| (r.stable_id(), r)).collect()
    }

    fn edge_labels(graph: &TopologyGraph, source: &str, target: &str) -> Vec<String> {
        graph
            .edges()
            .filter(|e| e.source == source && e.target == target)
            .flat_map(|e| e.attrs.labels.into_iter())
            .collect()
    }

    #[test]
    fn owned_pod_gets_exactly_one_owner_edge() {
        let mut pod = record("Pod", Some("default"), "web-0", Value::Null);
        pod.owner_refs.push(OwnerRef {
            api_version: "apps/v1".into(),
            kind: "ReplicaSet".into(),
            name: "web".into(),
            uid: "rs-uid".into(),
        });
        let mut rs = record("ReplicaSet", Some("default"), "web", Value::Null);
        rs.group = "apps".into();
        let ns = record("Namespace", None, "default", Value::Null);

        let graph = GraphBuilder::build(&records(vec![pod.clone(), rs.clone(), ns]));

        let pod_id = pod.stable_id();
        assert_eq!(graph.in_degree(&pod_id), 1);
        let labels = edge_labels(&graph, &rs.stable_id(), &pod_id);
        assert_eq!(labels, vec!["REPLICASET_OWNS_POD".to_string()]);
    }

    #[test]
    fn orphan_configmap_falls_back_to_namespace() {
        let cm = record("ConfigMap", Some("team-a"), "settings", Value::Null);
        let ns = record("Namespace", None, "team-a", Value::Null);

        let graph = GraphBuilder::build(&records(vec![cm.clone(), ns.clone()]));

        let labels = edge_labels(&graph, &ns.stable_id(), &cm.stable_id());
        assert_eq!(labels, vec!["NAMESPACE_OWNS_CONFIGMAP".to_string()]);
    }

    #[test]
    fn cluster_scoped_falls_back_to_root() {
        let node = record("Node", None, "worker-1", Value::Null);
        let graph = GraphBuilder::build(&records(vec![node.clone()]));

        let root_id = stable_id(&ResourceKey::cluster_root());
        let labels = edge_labels(&graph, &root_id, &node.stable_id());
        assert_eq!(labels, vec!["CLUSTER_OWN_RESOURCE".to_string()]);
    }

    #[test]
    fn endpoints_are_exempt_from_fallback() {
        let ep = record("Endpoints", Some("default"), "web", Value::Null);
        let ns = record("Namespace", None, "default", Value::Null);
        let graph = GraphBuilder::build(&records(vec![ep.clone(), ns]));

        // No Service present, so the Endpoints node stays unowned rather than
        // receiving a namespace edge.
        assert_eq!(graph.in_degree(&ep.stable_id()), 0);
    }

    #[test]
    fn pod_runs_on_node() {
        let pod = record(
            "Pod",
            Some("default"),
            "web-0",
            json!({"nodeName": "worker-1"}),
        );
        let node = record("Node", None, "worker-1", Value::Null);
        let ns = record("Namespace", None, "default", Value::Null);

        let graph = GraphBuilder::build(&records(vec![pod.clone(), node.clone(), ns]));

        let labels = edge_labels(&graph, &node.stable_id(), &pod.stable_id());
        assert!(labels.contains(&"NODE_RUNS_POD".to_string()));
    }

    #[test]
    fn service_selects_matching_pods() {
        let svc = record(
            "Service",
            Some("default"),
            "web",
            json!({"selector": {"app": "x"}}),
        );
        let mut pod1 = record("Pod", Some("default"), "web-0", Value::Null);
        pod1.labels.insert("app".into(), "x".into());
        let mut pod2 = record("Pod", Some("default"), "web-1", Value::Null);
        pod2.labels.insert("app".into(), "x".into());
        let mut other = record("Pod", Some("default"), "db-0", Value::Null);
        other.labels.insert("app".into(), "y".into());
        let ns = record("Namespace", None, "default", Value::Null);

        let graph = GraphBuilder::build(&records(vec![
            svc.clone(),
            pod1.clone(),
            pod2.clone(),
            other.clone(),
            ns,
        ]));

        let svc_id = svc.stable_id();
        assert!(edge_labels(&graph, &svc_id, &pod1.stable_id())
            .contains(&"SERVICE_SELECTS_POD".to_string()));
        assert!(edge_labels(&graph, &svc_id, &pod2.stable_id())
            .contains(&"SERVICE_SELECTS_POD".to_string()));
        assert!(edge_labels(&graph, &svc_id, &other.stable_id()).is_empty());
    }

    #[test]
    fn selector_must_match_namespace() {
        let svc = record(
            "Service",
            Some("default"),
            "web",
            json!({"selector": {"app": "x"}}),
        );
        let mut pod = record("Pod", Some("other"), "web-0", Value::Null);
        pod.labels.insert("app".into(), "x".into());
        let graph = GraphBuilder::build(&records(vec![svc.clone(), pod.clone()]));
        assert!(edge_labels(&graph, &svc.stable_id(), &pod.stable_id()).is_empty());
    }

    #[test]
    fn service_ports_become_port_nodes() {
        let svc = record(
            "Service",
            Some("default"),
            "web",
            json!({"ports": [{"port": 80, "protocol": "TCP"}]}),
        );
        let ns = record("Namespace", None, "default", Value::Null);
        let graph = GraphBuilder::build(&records(vec![svc.clone(), ns]));

        let port_key = ResourceKey::new(
            "",
            "v1",
            "Port",
            Some("default".into()),
            "web-80-TCP",
        );
        let port_id = stable_id(&port_key);
        assert!(graph.contains(&port_id));
        assert!(edge_labels(&graph, &svc.stable_id(), &port_id)
            .contains(&"SERVICE_OWNS_PORT".to_string()));
        // Port nodes never get a fallback owner, so in-degree is exactly 1.
        assert_eq!(graph.in_degree(&port_id), 1);
        assert_eq!(graph.node(&port_id).unwrap().extra.get("port").unwrap(), "80");
    }

    #[test]
    fn string_typed_ports_are_not_quoted() {
        let svc = record(
            "Service",
            Some("default"),
            "web",
            json!({"ports": [{"port": "8080", "protocol": "UDP"}]}),
        );
        let ns = record("Namespace", None, "default", Value::Null);
        let graph = GraphBuilder::build(&records(vec![svc, ns]));

        let port_key = ResourceKey::new(
            "",
            "v1",
            "Port",
            Some("default".into()),
            "web-8080-UDP",
        );
        let port_id = stable_id(&port_key);
        assert!(graph.contains(&port_id));
        assert_eq!(
            graph.node(&port_id).unwrap().extra.get("port").unwrap(),
            "8080"
        );
    }

    #[test]
    fn endpoints_wire_service_to_pod_ports() {
        let svc = record("Service", Some("default"), "web", Value::Null);
        let pod = record("Pod", Some("default"), "web-0", Value::Null);
        let ep = record(
            "Endpoints",
            Some("default"),
            "web",
            json!({
                "subsets": [{
                    "addresses": [{"targetRef": {"kind": "Pod", "name": "web-0"}}],
                    "ports": [{"port": 8080, "protocol": "TCP"}]
                }]
            }),
        );
        let ns = record("Namespace", None, "default", Value::Null);

        let graph =
            GraphBuilder::build(&records(vec![svc.clone(), pod.clone(), ep.clone(), ns]));

        assert!(edge_labels(&graph, &svc.stable_id(), &ep.stable_id())
            .contains(&"SERVICE_HAS_ENDPOINTS".to_string()));
        assert!(edge_labels(&graph, &ep.stable_id(), &pod.stable_id())
            .contains(&"ENDPOINTS_TARGET_POD".to_string()));

        let pod_port = stable_id(&ResourceKey::new(
            "",
            "v1",
            "Port",
            Some("default".into()),
            "web-0-8080-TCP",
        ));
        let svc_port = stable_id(&ResourceKey::new(
            "",
            "v1",
            "Port",
            Some("default".into()),
            "web-8080-TCP",
        ));
        assert!(edge_labels(&graph, &pod.stable_id(), &pod_port)
            .contains(&"POD_OWNS_PORT".to_string()));
        assert!(edge_labels(&graph, &svc_port, &pod_port)
            .contains(&"SERVICE_TARGETS_PORT".to_string()));
    }

    #[test]
    fn pv_binds_to_pvc() {
        let pv = record(
            "PersistentVolume",
            None,
            "pv-1",
            json!({"claimRef": {"name": "data", "namespace": "default"}}),
        );
        let pvc = record("PersistentVolumeClaim", Some("default"), "data", Value::Null);
        let ns = record("Namespace", None, "default", Value::Null);

        let graph = GraphBuilder::build(&records(vec![pv.clone(), pvc.clone(), ns]));
        assert!(edge_labels(&graph, &pv.stable_id(), &pvc.stable_id())
            .contains(&"PV_BOUND_TO_PVC".to_string()));
    }

    #[test]
    fn pod_mount_edges() {
        let pod = record(
            "Pod",
            Some("default"),
            "web-0",
            json!({"volumes": [
                {"configMap": {"name": "settings"}},
                {"secret": {"secretName": "creds"}},
                {"persistentVolumeClaim": {"claimName": "data"}},
            ]}),
        );
        let cm = record("ConfigMap", Some("default"), "settings", Value::Null);
        let secret = record("Secret", Some("default"), "creds", Value::Null);
        let pvc = record("PersistentVolumeClaim", Some("default"), "data", Value::Null);
        let ns = record("Namespace", None, "default", Value::Null);

        let graph = GraphBuilder::build(&records(vec![
            pod.clone(),
            cm.clone(),
            secret.clone(),
            pvc.clone(),
            ns,
        ]));

        let pod_id = pod.stable_id();
        assert!(edge_labels(&graph, &pod_id, &cm.stable_id())
            .contains(&"POD_MOUNTS_CONFIGMAP".to_string()));
        assert!(edge_labels(&graph, &pod_id, &secret.stable_id())
            .contains(&"POD_MOUNTS_SECRET".to_string()));
        assert!(edge_labels(&graph, &pod_id, &pvc.stable_id())
            .contains(&"POD_MOUNTS_PVC".to_string()));
    }

    #[test]
    fn mount_edge_to_missing_target_is_skipped() {
        let pod = record(
            "Pod",
            Some("default"),
            "web-0",
            json!({"volumes": [{"configMap": {"name": "missing"}}]}),
        );
        let ns = record("Namespace", None, "default", Value::Null);
        let graph = GraphBuilder::build(&records(vec![pod.clone(), ns]));
        assert_eq!(graph.out_degree(&pod.stable_id()), 0);
    }

    #[test]
    fn every_non_root_node_has_an_owner() {
        let ns = record("Namespace", None, "default", Value::Null);
        let pod = record("Pod", Some("default"), "web-0", Value::Null);
        let node = record("Node", None, "worker-1", Value::Null);
        let cm = record("ConfigMap", Some("default"), "settings", Value::Null);

        let graph = GraphBuilder::build(&records(vec![ns, pod, node, cm]));
        let root_id = stable_id(&ResourceKey::cluster_root());

        for n in graph.nodes() {
            if n.id == root_id {
                continue;
            }
            assert!(
                graph.in_degree(&n.id) >= 1,
                "{}/{} has in-degree 0",
                n.kind,
                n.name
            );
        }
    }
}
