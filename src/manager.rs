//! Topology Manager: the single owner of the live graph.
//!
//! All graph state sits behind one `std::sync::Mutex`. The lock is never
//! held across I/O: `refresh` collects and builds a complete replacement
//! graph first and swaps it in under the lock, and snapshot writes
//! serialize under the lock but hit the filesystem after releasing it.
//! Readers always observe either the previous graph or the new one, never
//! a half-built state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;

use crate::client::ClusterApi;
use crate::collect::ResourceCollector;
use crate::error::{GraphError, SnapshotError, TopoError};
use crate::graph::build::GraphBuilder;
use crate::graph::{NodeAttrs, TopologyGraph, unix_now};
use crate::resource::{ResourceKey, is_cluster_scoped, stable_id};
use crate::snapshot::{self, GraphDoc};

pub struct TopologyManager {
    graph: Mutex<TopologyGraph>,
    /// cache_key -> stable id memoization; reconstructable from keys.
    id_cache: DashMap<String, String>,
    data_dir: PathBuf,
}

impl TopologyManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            graph: Mutex::new(TopologyGraph::new()),
            id_cache: DashMap::new(),
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // A poisoned lock means a writer panicked mid-mutation; the graph is
    // rebuilt wholesale on the next refresh, so continuing with the inner
    // value is safe.
    fn lock(&self) -> MutexGuard<'_, TopologyGraph> {
        self.graph
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stable id for a composite key, memoized. Never fails: the cache is
    /// pure memoization and the id can always be recomputed from the key.
    pub fn resolve_stable_id(&self, key: &ResourceKey) -> String {
        let cache_key = key.cache_key();
        if let Some(hit) = self.id_cache.get(&cache_key) {
            return hit.clone();
        }
        let id = stable_id(key);
        self.id_cache.insert(cache_key, id.clone());
        id
    }

    /// Full rebuild: list everything, derive the graph, swap it in.
    ///
    /// Collection and build run without the lock; only the final swap
    /// takes it. Partial per-kind collection failures have already been
    /// logged and skipped by the collector.
    pub async fn refresh(&self, client: &dyn ClusterApi) -> Result<(), TopoError> {
        let records = ResourceCollector::collect_all(client).await?;
        for record in records.values() {
            self.resolve_stable_id(&record.key());
        }
        let next = GraphBuilder::build(&records);
        let (nodes, edges) = (next.node_count(), next.edge_count());
        *self.lock() = next;
        tracing::info!(nodes, edges, "topology refreshed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Incremental mutation (watch path)
    // -----------------------------------------------------------------------

    /// Insert or update one node, applying the default-ownership rule at
    /// call time: an in-degree-0 node gets a root or namespace owner edge,
    /// creating the namespace (and root) node on demand. Port nodes are
    /// exempt. Returns the node's stable id.
    pub fn add_node(&self, attrs: NodeAttrs) -> String {
        let mut graph = self.lock();
        self.add_node_locked(&mut graph, attrs)
    }

    fn add_node_locked(&self, graph: &mut TopologyGraph, attrs: NodeAttrs) -> String {
        let kind = attrs.kind.clone();
        let namespace = attrs.namespace.clone();
        self.id_cache.insert(attrs.key().cache_key(), attrs.id.clone());
        let id = graph.upsert_node(attrs);

        if kind != "Port" && graph.in_degree(&id) == 0 {
            if is_cluster_scoped(&kind) || namespace.is_empty() {
                let root = self.ensure_root_locked(graph);
                graph.merge_edge(&root, &id, "CLUSTER_OWN_RESOURCE");
            } else {
                let ns = self.ensure_namespace_locked(graph, &namespace);
                let label = format!("NAMESPACE_OWNS_{}", kind.to_uppercase());
                graph.merge_edge(&ns, &id, &label);
            }
        }
        id
    }

    /// Merge an edge label idempotently. A missing endpoint is an error on
    /// this incremental path — the caller asked for a specific edge, unlike
    /// the bulk builder which skips inferred edges whose endpoint never
    /// materialized.
    pub fn add_edge(&self, from: &str, to: &str, rel_type: &str) -> Result<(), GraphError> {
        let mut graph = self.lock();
        if graph.merge_edge(from, to, rel_type) {
            return Ok(());
        }
        let endpoint = if graph.contains(from) { to } else { from };
        Err(GraphError::DanglingEdge {
            from: from.to_string(),
            to: to.to_string(),
            endpoint: endpoint.to_string(),
        })
    }

    fn ensure_root_locked(&self, graph: &mut TopologyGraph) -> String {
        let key = ResourceKey::cluster_root();
        let id = self.resolve_stable_id(&key);
        if !graph.contains(&id) {
            let mut attrs = NodeAttrs::from_key(&key);
            attrs.uid = id.clone();
            graph.upsert_node(attrs);
        }
        id
    }

    fn ensure_namespace_locked(&self, graph: &mut TopologyGraph, namespace: &str) -> String {
        let key = ResourceKey::namespace(namespace);
        let id = self.resolve_stable_id(&key);
        if !graph.contains(&id) {
            graph.upsert_node(NodeAttrs::from_key(&key));
            let root = self.ensure_root_locked(graph);
            graph.merge_edge(&root, &id, "CLUSTER_OWN_NAMESPACE");
        }
        id
    }

    /// Remove a node and its edges. Returns true if it existed.
    pub fn remove_node(&self, id: &str) -> bool {
        self.lock().remove_node(id).is_some()
    }

    // -----------------------------------------------------------------------
    // Export and persistence
    // -----------------------------------------------------------------------

    /// Export the current graph as a string-attribute document.
    pub fn graph_doc(&self) -> GraphDoc {
        snapshot::graph_to_doc(&self.lock())
    }

    pub fn node_count(&self) -> usize {
        self.lock().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.lock().edge_count()
    }

    /// Write the current state to `topology_snapshot_<unixtime>.json`.
    ///
    /// Serialization happens under the lock; the file write does not.
    pub fn save_snapshot(&self) -> Result<PathBuf, SnapshotError> {
        let (doc, cache) = {
            let graph = self.lock();
            let cache: BTreeMap<String, String> = self
                .id_cache
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect();
            (snapshot::graph_to_doc(&graph), cache)
        };
        let path = snapshot::write_snapshot(&self.data_dir, doc, cache)?;
        tracing::info!(path = %path.display(), "snapshot saved");
        Ok(path)
    }

    /// Replace the live state with a snapshot's contents.
    pub fn load_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let doc = snapshot::read_snapshot(path)?;
        let restored = snapshot::doc_to_graph(&doc.graph);
        self.id_cache.clear();
        for (cache_key, id) in doc.node_cache {
            self.id_cache.insert(cache_key, id);
        }
        *self.lock() = restored;
        tracing::info!(path = %path.display(), "snapshot loaded");
        Ok(())
    }

    pub fn latest_snapshot(&self) -> Result<Option<PathBuf>, SnapshotError> {
        snapshot::latest_snapshot(&self.data_dir)
    }

    /// Keep the N most recently modified snapshots.
    pub fn cleanup_old_snapshots(&self, max_kept: usize) -> Result<usize, SnapshotError> {
        snapshot::cleanup_old_snapshots(&self.data_dir, max_kept)
    }

    /// Evict nodes not seen within `max_age`. Returns how many were removed.
    pub fn cleanup_old_nodes(&self, max_age: Duration) -> usize {
        let cutoff = unix_now().saturating_sub(max_age.as_secs());
        let mut graph = self.lock();
        let stale = graph.nodes_older_than(cutoff);
        let count = stale.len();
        for id in stale {
            graph.remove_node(&id);
        }
        if count > 0 {
            tracing::debug!(count, "evicted stale nodes");
        }
        count
    }
}

/// Periodic persistence loop for the serve path: save a snapshot, prune
/// old ones, evict stale nodes, sleep. Errors are logged and the next
/// cycle runs anyway; only cancellation stops it.
pub async fn run_snapshot_worker(
    manager: Arc<TopologyManager>,
    interval: Duration,
    max_snapshots: usize,
    node_ttl: Duration,
    cancel: tokio_util::sync::CancellationToken,
) {
    loop {
        if let Err(e) = manager.save_snapshot() {
            tracing::error!(error = %e, "snapshot save failed");
        }
        if let Err(e) = manager.cleanup_old_snapshots(max_snapshots) {
            tracing::error!(error = %e, "snapshot cleanup failed");
        }
        manager.cleanup_old_nodes(node_ttl);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FixtureClient;
    use serde_json::json;

    fn manager() -> (TopologyManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (TopologyManager::new(dir.path()), dir)
    }

    fn key(kind: &str, ns: Option<&str>, name: &str) -> ResourceKey {
        ResourceKey::new("", "v1", kind, ns.map(String::from), name)
    }

    #[test]
    fn resolve_is_cached_and_pure() {
        let (mgr, _dir) = manager();
        let k = key("Pod", Some("default"), "web-0");
        let a = mgr.resolve_stable_id(&k);
        let b = mgr.resolve_stable_id(&k);
        assert_eq!(a, b);
        assert_eq!(a, stable_id(&k));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn add_node_creates_namespace_chain_on_demand() {
        let (mgr, _dir) = manager();
        let id = mgr.add_node(NodeAttrs::from_key(&key("Pod", Some("default"), "web-0")));

        let doc = mgr.graph_doc();
        // Pod + Namespace + root.
        assert_eq!(doc.nodes.len(), 3);

        let ns_id = stable_id(&ResourceKey::namespace("default"));
        let root_id = stable_id(&ResourceKey::cluster_root());
        let has = |s: &str, t: &str, l: &str| {
            doc.edges.iter().any(|e| {
                e.source == s && e.target == t && e.attributes["labels"].contains(l)
            })
        };
        assert!(has(&ns_id, &id, "NAMESPACE_OWNS_POD"));
        assert!(has(&root_id, &ns_id, "CLUSTER_OWN_NAMESPACE"));
    }

    #[test]
    fn port_nodes_get_no_fallback_owner() {
        let (mgr, _dir) = manager();
        mgr.add_node(NodeAttrs::from_key(&key("Port", Some("default"), "web-80-TCP")));
        let doc = mgr.graph_doc();
        assert_eq!(doc.nodes.len(), 1);
        assert!(doc.edges.is_empty());
    }

    #[test]
    fn add_edge_requires_both_endpoints() {
        let (mgr, _dir) = manager();
        let a = mgr.add_node(NodeAttrs::from_key(&key("Node", None, "worker-1")));
        let err = mgr.add_edge(&a, "feedfacedeadbeef", "NODE_RUNS_POD").unwrap_err();
        assert!(matches!(
            err,
            crate::error::GraphError::DanglingEdge { ref endpoint, .. }
                if endpoint == "feedfacedeadbeef"
        ));
        let b = mgr.add_node(NodeAttrs::from_key(&key("Pod", Some("default"), "web-0")));
        mgr.add_edge(&a, &b, "NODE_RUNS_POD").unwrap();
        // Idempotent merge.
        mgr.add_edge(&a, &b, "NODE_RUNS_POD").unwrap();
    }

    #[tokio::test]
    async fn refresh_swaps_in_a_full_rebuild() {
        let (mgr, _dir) = manager();
        let objects = [
            json!({"apiVersion": "v1", "kind": "Namespace",
                   "metadata": {"name": "default", "uid": "u1"}}),
            json!({"apiVersion": "v1", "kind": "Pod",
                   "metadata": {"name": "web-0", "namespace": "default", "uid": "u2"},
                   "spec": {"nodeName": "worker-1"}}),
            json!({"apiVersion": "v1", "kind": "Node",
                   "metadata": {"name": "worker-1", "uid": "u3"}}),
        ]
        .map(|v| serde_json::from_value(v).unwrap());
        let client = FixtureClient::from_objects(objects.into_iter().collect());
        mgr.refresh(&client).await.unwrap();

        // 3 records + root.
        assert_eq!(mgr.node_count(), 4);
        let pod_id = mgr.resolve_stable_id(&key("Pod", Some("default"), "web-0"));
        let node_id = mgr.resolve_stable_id(&key("Node", None, "worker-1"));
        let doc = mgr.graph_doc();
        assert!(doc.edges.iter().any(|e| {
            e.source == node_id && e.target == pod_id
                && e.attributes["labels"].contains("NODE_RUNS_POD")
        }));
    }

    #[tokio::test]
    async fn snapshot_round_trip_through_manager() {
        let (mgr, _dir) = manager();
        mgr.add_node(NodeAttrs::from_key(&key("Pod", Some("default"), "web-0")));
        let before = mgr.graph_doc();
        let path = mgr.save_snapshot().unwrap();

        let (other, _dir2) = manager();
        other.load_snapshot(&path).unwrap();
        let after = other.graph_doc();

        assert_eq!(before.nodes.len(), after.nodes.len());
        assert_eq!(before.edges.len(), after.edges.len());
        // Identity cache restored too.
        let k = key("Pod", Some("default"), "web-0");
        assert_eq!(other.resolve_stable_id(&k), mgr.resolve_stable_id(&k));
    }

    #[test]
    fn latest_snapshot_none_when_empty() {
        let (mgr, _dir) = manager();
        assert!(mgr.latest_snapshot().unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_worker_saves_then_stops_on_cancel() {
        let (mgr, _dir) = manager();
        let mgr = Arc::new(mgr);
        mgr.add_node(NodeAttrs::from_key(&key("Node", None, "worker-1")));

        let cancel = tokio_util::sync::CancellationToken::new();
        let worker = tokio::spawn(run_snapshot_worker(
            Arc::clone(&mgr),
            Duration::from_secs(3600),
            10,
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        // First cycle runs immediately; the worker then parks on the timer.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        worker.await.unwrap();

        assert!(mgr.latest_snapshot().unwrap().is_some());
    }

    #[test]
    fn cleanup_old_nodes_boundary() {
        let (mgr, _dir) = manager();
        let fresh = mgr.add_node(NodeAttrs::from_key(&key("Pod", Some("default"), "web-0")));
        let stale_id = {
            let mut attrs = NodeAttrs::from_key(&key("Pod", Some("default"), "web-1"));
            attrs.last_seen = unix_now() - 7200;
            mgr.add_node(attrs)
        };

        let removed = mgr.cleanup_old_nodes(Duration::from_secs(3600));
        assert_eq!(removed, 1);
        let doc = mgr.graph_doc();
        assert!(doc.nodes.iter().any(|n| n.id == fresh));
        assert!(!doc.nodes.iter().any(|n| n.id == stale_id));
    }
}
