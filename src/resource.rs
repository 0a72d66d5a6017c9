//! Core resource types for the topomap engine.
//!
//! Every cluster object is normalized into a [`ResourceRecord`] keyed by a
//! [`ResourceKey`], and identified in the graph by a deterministic
//! [`stable_id`] derived from that key. The id is a pure function: the same
//! key always produces the same id, across calls and across restarts.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Resource kinds that exist outside any namespace.
///
/// Without this set, owner references and fallback ownership would attach
/// cluster-scoped objects (Nodes in particular) to a namespace.
pub static CLUSTER_SCOPED_KINDS: LazyLock<std::collections::HashSet<&'static str>> =
    LazyLock::new(|| {
        [
            "Node",
            "Namespace",
            "PersistentVolume",
            "ClusterRole",
            "ClusterRoleBinding",
            "StorageClass",
            "CSIDriver",
            "CSINode",
            "PriorityClass",
            "RuntimeClass",
            "VolumeAttachment",
            "PodSecurityPolicy",
            "CustomResourceDefinition",
            "ValidatingWebhookConfiguration",
            "MutatingWebhookConfiguration",
            "PodPreset",
            "InitializerConfiguration",
        ]
        .into_iter()
        .collect()
    });

/// Returns true if the kind is cluster-scoped (namespace-less by definition).
pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(kind)
}

/// The five-part composite key identifying a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// API group ("" for the core group).
    pub group: String,
    /// API version within the group.
    pub version: String,
    /// Resource kind, e.g. "Pod".
    pub kind: String,
    /// Namespace, or `None` for cluster-scoped resources.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            namespace,
            name: name.into(),
        }
    }

    /// Split an `apiVersion` string ("group/version" or bare "version") into
    /// its (group, version) parts.
    pub fn split_api_version(api_version: &str) -> (&str, &str) {
        match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        }
    }

    /// The composite cache key used by the identity cache.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.group,
            self.version,
            self.kind,
            self.namespace.as_deref().unwrap_or(""),
            self.name
        )
    }

    /// Key for the synthetic cluster root node.
    pub fn cluster_root() -> Self {
        Self::new("", "v1", "Cluster", None, "cluster")
    }

    /// Key for a namespace node.
    pub fn namespace(name: &str) -> Self {
        Self::new("", "v1", "Namespace", None, name)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} ({}/{})", self.kind, self.name, ns, self.version),
            None => write!(f, "{}/{} ({})", self.kind, self.name, self.version),
        }
    }
}

/// Compute the deterministic stable id for a resource key.
///
/// SHA-256 over `group:version:kind:namespace-or-empty:name`, truncated to the
/// first 16 hex characters. This is the graph's node key and must never depend
/// on process state.
pub fn stable_id(key: &ResourceKey) -> String {
    let digest = Sha256::digest(key.cache_key().as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// A declaration that one object is logically owned by another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

/// A normalized cluster resource, as produced by the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub owner_refs: Vec<OwnerRef>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: serde_json::Value,
    #[serde(default)]
    pub uid: String,
}

impl ResourceRecord {
    /// The composite key for this record.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.group.clone(),
            self.version.clone(),
            self.kind.clone(),
            self.namespace.clone(),
            self.name.clone(),
        )
    }

    /// The stable id for this record.
    pub fn stable_id(&self) -> String {
        stable_id(&self.key())
    }

    /// Resolve an owner reference into the owner's key, in the context of
    /// this record's namespace. Cluster-scoped owners get no namespace.
    pub fn owner_key(&self, owner: &OwnerRef) -> ResourceKey {
        let (group, version) = ResourceKey::split_api_version(&owner.api_version);
        let namespace = if is_cluster_scoped(&owner.kind) {
            None
        } else {
            self.namespace.clone()
        };
        ResourceKey::new(group, version, owner.kind.clone(), namespace, owner.name.clone())
    }
}
