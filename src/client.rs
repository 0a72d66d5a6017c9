//! Cluster API capability: list, discover, and watch.
//!
//! The engine never talks to a cluster directly; it consumes a [`ClusterApi`]
//! implementation. The trait carries exactly the three operations the core
//! needs — kind discovery, listing, and resumable watching — and keeps the
//! "resource version expired" condition distinct from other errors so the
//! watcher can restart silently.
//!
//! [`FixtureClient`] is the bundled implementation: it serves a static object
//! dump from a JSON file, which backs the CLI `serve` command, demos, and
//! tests. A live cluster transport is an external collaborator and plugs in
//! through the same trait.

use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// A discoverable resource kind: apiVersion + kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KindRef {
    /// Full apiVersion string, e.g. "v1" or "apps/v1".
    pub api_version: String,
    /// Resource kind, e.g. "Pod".
    pub kind: String,
}

impl KindRef {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }
}

impl std::fmt::Display for KindRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Object metadata as delivered by the cluster API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<crate::resource::OwnerRef>,
    #[serde(default)]
    pub resource_version: String,
}

/// A raw cluster object: the unit both listing and watching deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObject {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: serde_json::Value,
}

/// The type of a cluster change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Added => write!(f, "ADDED"),
            EventType::Modified => write!(f, "MODIFIED"),
            EventType::Deleted => write!(f, "DELETED"),
        }
    }
}

/// A single change notification from a watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: RawObject,
}

/// One page of listed objects plus the resource version to watch from.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<RawObject>,
    pub resource_version: String,
}

/// Boxed stream of watch events. Ends when the server closes the stream.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent, ClientError>> + Send>>;

/// The cluster access capability consumed by the engine.
///
/// `watch` must support resuming from a resource version and must surface
/// [`ClientError::VersionExpired`] distinctly from transient failures.
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// Enumerate the watchable/listable resource kinds.
    async fn discover_kinds(&self) -> Result<Vec<KindRef>, ClientError>;

    /// List all current objects of a kind.
    async fn list(&self, kind: &KindRef) -> Result<ListPage, ClientError>;

    /// Open a watch for a kind, resuming from `resource_version`.
    async fn watch(
        &self,
        kind: &KindRef,
        resource_version: &str,
    ) -> Result<WatchStream, ClientError>;
}

/// Kinds the engine never collects or watches: list pseudo-types, one-shot
/// review objects, and subresources.
const SKIPPED_RESOURCE_NAMES: &[&str] = &[
    "events",
    "bindings",
    "tokenreviews",
    "selfsubjectreviews",
    "selfsubjectaccessreviews",
    "selfsubjectrulesreviews",
    "subjectaccessreviews",
    "localsubjectaccessreviews",
    "componentstatuses",
];

/// Discovery filter for transports that expose full API metadata.
///
/// Keeps a resource only if it is a real, listable object kind.
pub fn is_collectable(kind: &str, plural_name: &str, verbs: &[String]) -> bool {
    if kind.ends_with("List") {
        return false;
    }
    if SKIPPED_RESOURCE_NAMES.contains(&plural_name.to_lowercase().as_str()) {
        return false;
    }
    // Subresources come through as "parent/sub".
    if plural_name.contains('/') {
        return false;
    }
    verbs.iter().any(|v| v == "list" || v == "get")
}

// ---------------------------------------------------------------------------
// Fixture client
// ---------------------------------------------------------------------------

/// Cluster client backed by a static JSON object dump.
///
/// The fixture file is a JSON array of [`RawObject`]s. Listing groups them by
/// (apiVersion, kind); watching returns a stream that stays pending until
/// dropped, so a fixture-backed engine is driven purely by periodic refresh.
pub struct FixtureClient {
    objects: Vec<RawObject>,
}

impl FixtureClient {
    /// Load a fixture from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path).map_err(|e| ClientError::Fixture {
            message: format!("{}: {e}", path.display()),
        })?;
        let objects: Vec<RawObject> =
            serde_json::from_str(&text).map_err(|e| ClientError::Fixture {
                message: format!("{}: {e}", path.display()),
            })?;
        Ok(Self { objects })
    }

    /// Build a fixture client from in-memory objects.
    pub fn from_objects(objects: Vec<RawObject>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl ClusterApi for FixtureClient {
    async fn discover_kinds(&self) -> Result<Vec<KindRef>, ClientError> {
        let mut kinds: Vec<KindRef> = Vec::new();
        for obj in &self.objects {
            let kref = KindRef::new(obj.api_version.clone(), obj.kind.clone());
            if !kinds.contains(&kref) {
                kinds.push(kref);
            }
        }
        Ok(kinds)
    }

    async fn list(&self, kind: &KindRef) -> Result<ListPage, ClientError> {
        let items: Vec<RawObject> = self
            .objects
            .iter()
            .filter(|o| o.api_version == kind.api_version && o.kind == kind.kind)
            .cloned()
            .collect();
        Ok(ListPage {
            items,
            resource_version: "0".into(),
        })
    }

    async fn watch(
        &self,
        _kind: &KindRef,
        _resource_version: &str,
    ) -> Result<WatchStream, ClientError> {
        // A fixture never changes; the stream stays pending until the watch
        // session hits its max age or the watcher is cancelled.
        Ok(Box::pin(futures_util::stream::pending()))
    }
}
