//! Snapshot persistence: the exported document shape and the files on disk.
//!
//! A snapshot is a plain JSON document in which every attribute value has
//! been stringified, so the file survives schema drift and tools in other
//! languages can consume it without reimplementing the graph types. The
//! same node/edge document shape (without the cache or metadata envelope)
//! is what the HTTP surface and the analysis toolkit operate on.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::graph::{EdgeAttrs, NodeAttrs, TopologyGraph, unix_now};

/// Snapshot file name prefix; the suffix is the save time in unix seconds.
pub const SNAPSHOT_PREFIX: &str = "topology_snapshot_";

const SNAPSHOT_VERSION: &str = "1.0";

/// One node in the exported document. All attribute values are strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoc {
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

/// One edge in the exported document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDoc {
    pub source: String,
    pub target: String,
    pub attributes: BTreeMap<String, String>,
}

/// The graph portion of a snapshot: what analyzers and the HTTP surface see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDoc {
    pub nodes: Vec<NodeDoc>,
    pub edges: Vec<EdgeDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub timestamp: u64,
    pub version: String,
}

/// A full on-disk snapshot: the graph plus the identity cache and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDoc {
    #[serde(flatten)]
    pub graph: GraphDoc,
    pub node_cache: BTreeMap<String, String>,
    pub metadata: SnapshotMeta,
}

// ---------------------------------------------------------------------------
// Graph <-> document conversion
// ---------------------------------------------------------------------------

fn node_to_doc(node: &NodeAttrs) -> NodeDoc {
    let mut attributes = node.extra.clone();
    attributes.insert("kind".into(), node.kind.clone());
    attributes.insert("group".into(), node.group.clone());
    attributes.insert("version".into(), node.version.clone());
    attributes.insert("namespace".into(), node.namespace.clone());
    attributes.insert("name".into(), node.name.clone());
    attributes.insert("uid".into(), node.uid.clone());
    attributes.insert("last_seen".into(), node.last_seen.to_string());
    attributes.insert(
        "labels".into(),
        serde_json::to_string(&node.labels).unwrap_or_else(|_| "{}".into()),
    );
    NodeDoc {
        id: node.id.clone(),
        attributes,
    }
}

fn doc_to_node(doc: &NodeDoc) -> NodeAttrs {
    let mut extra = doc.attributes.clone();
    let take = |extra: &mut BTreeMap<String, String>, key: &str| {
        extra.remove(key).unwrap_or_default()
    };
    let labels = extra
        .remove("labels")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    let last_seen = extra
        .remove("last_seen")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    NodeAttrs {
        id: doc.id.clone(),
        kind: take(&mut extra, "kind"),
        group: take(&mut extra, "group"),
        version: take(&mut extra, "version"),
        namespace: take(&mut extra, "namespace"),
        name: take(&mut extra, "name"),
        uid: take(&mut extra, "uid"),
        labels,
        last_seen,
        extra,
    }
}

fn edge_attrs_to_doc(attrs: &EdgeAttrs) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert(
        "labels".into(),
        serde_json::to_string(&attrs.labels).unwrap_or_else(|_| "[]".into()),
    );
    out.insert("last_seen".into(), attrs.last_seen.to_string());
    out
}

fn doc_to_edge_attrs(attributes: &BTreeMap<String, String>) -> EdgeAttrs {
    let labels: BTreeSet<String> = attributes
        .get("labels")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let last_seen = attributes
        .get("last_seen")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    EdgeAttrs { labels, last_seen }
}

/// Export the live graph as a document.
pub fn graph_to_doc(graph: &TopologyGraph) -> GraphDoc {
    let mut nodes: Vec<NodeDoc> = graph.nodes().map(node_to_doc).collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    let mut edges: Vec<EdgeDoc> = graph
        .edges()
        .map(|e| EdgeDoc {
            source: e.source,
            target: e.target,
            attributes: edge_attrs_to_doc(&e.attrs),
        })
        .collect();
    edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
    GraphDoc { nodes, edges }
}

/// Reconstruct a live graph from a document.
///
/// Edges referencing ids absent from the node list are skipped, the same
/// rule the live graph applies.
pub fn doc_to_graph(doc: &GraphDoc) -> TopologyGraph {
    let mut graph = TopologyGraph::new();
    for node in &doc.nodes {
        graph.upsert_node(doc_to_node(node));
    }
    for edge in &doc.edges {
        let attrs = doc_to_edge_attrs(&edge.attributes);
        let mut merged = false;
        for label in &attrs.labels {
            merged |= graph.merge_edge(&edge.source, &edge.target, label);
        }
        // Merging stamps the current time; the document's recorded
        // observation time wins on restore.
        if merged && let Some(live) = graph.edge_mut(&edge.source, &edge.target) {
            live.last_seen = attrs.last_seen;
        }
    }
    graph
}

// ---------------------------------------------------------------------------
// Files on disk
// ---------------------------------------------------------------------------

fn io_err(path: &Path, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write a snapshot into the data directory, named by the current time.
pub fn write_snapshot(
    dir: &Path,
    graph: GraphDoc,
    node_cache: BTreeMap<String, String>,
) -> Result<PathBuf, SnapshotError> {
    let timestamp = unix_now();
    let doc = SnapshotDoc {
        graph,
        node_cache,
        metadata: SnapshotMeta {
            timestamp,
            version: SNAPSHOT_VERSION.into(),
        },
    };
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let path = dir.join(format!("{SNAPSHOT_PREFIX}{timestamp}.json"));
    let body = serde_json::to_string_pretty(&doc).map_err(|e| SnapshotError::Malformed {
        path: path.display().to_string(),
        source: e,
    })?;
    fs::write(&path, body).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// Read and parse a snapshot file.
pub fn read_snapshot(path: &Path) -> Result<SnapshotDoc, SnapshotError> {
    if !path.exists() {
        return Err(SnapshotError::NotFound {
            path: path.display().to_string(),
        });
    }
    let body = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&body).map_err(|e| SnapshotError::Malformed {
        path: path.display().to_string(),
        source: e,
    })
}

fn snapshot_files(dir: &Path) -> Result<Vec<PathBuf>, SnapshotError> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let is_snapshot = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX) && n.ends_with(".json"));
        if is_snapshot {
            out.push(path);
        }
    }
    Ok(out)
}

fn mtime(path: &Path) -> std::time::SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

/// The most recently modified snapshot in the data directory, if any.
pub fn latest_snapshot(dir: &Path) -> Result<Option<PathBuf>, SnapshotError> {
    let files = snapshot_files(dir)?;
    Ok(files.into_iter().max_by_key(|p| mtime(p)))
}

/// Keep the `max_kept` most recently modified snapshots, delete the rest.
/// Returns how many files were removed.
pub fn cleanup_old_snapshots(dir: &Path, max_kept: usize) -> Result<usize, SnapshotError> {
    let mut files = snapshot_files(dir)?;
    if files.len() <= max_kept {
        return Ok(0);
    }
    files.sort_by_key(|p| mtime(p));
    let excess = files.len() - max_kept;
    for path in &files[..excess] {
        fs::remove_file(path).map_err(|e| io_err(path, e))?;
        tracing::debug!(path = %path.display(), "removed old snapshot");
    }
    Ok(excess)
}
