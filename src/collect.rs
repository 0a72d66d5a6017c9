//! Resource Collector: enumerate every resource of every discovered kind.
//!
//! Collection has partial-failure semantics: a kind that fails to list is
//! logged and left out of the result, it never fails the collection as a
//! whole. There is no ordering guarantee across kinds.

use std::collections::HashMap;

use crate::client::{ClusterApi, RawObject};
use crate::error::CollectError;
use crate::resource::{ResourceKey, ResourceRecord};

/// Collects all raw cluster resources into normalized records.
pub struct ResourceCollector;

impl ResourceCollector {
    /// Query the cluster for all resources of all discovered kinds.
    ///
    /// Returns a map from stable id to [`ResourceRecord`]. Failing the
    /// discovery call is the only fatal condition; per-kind listing errors
    /// only shrink the result.
    pub async fn collect_all(
        client: &dyn ClusterApi,
    ) -> Result<HashMap<String, ResourceRecord>, CollectError> {
        let kinds = client
            .discover_kinds()
            .await
            .map_err(|e| CollectError::Discovery {
                message: e.to_string(),
            })?;

        let mut records = HashMap::new();
        for kind in &kinds {
            match client.list(kind).await {
                Ok(page) => {
                    for obj in page.items {
                        let record = normalize(&obj);
                        records.insert(record.stable_id(), record);
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "skipping kind: listing failed");
                }
            }
        }

        tracing::debug!(
            kinds = kinds.len(),
            records = records.len(),
            "resource collection complete"
        );
        Ok(records)
    }

}

/// Normalize a raw cluster object into a [`ResourceRecord`].
pub fn normalize(obj: &RawObject) -> ResourceRecord {
    let (group, version) = ResourceKey::split_api_version(&obj.api_version);
    ResourceRecord {
        group: group.to_string(),
        version: version.to_string(),
        kind: obj.kind.clone(),
        namespace: obj.metadata.namespace.clone(),
        name: obj.metadata.name.clone(),
        owner_refs: obj.metadata.owner_references.clone(),
        labels: obj.metadata.labels.clone(),
        spec: obj.spec.clone(),
        status: obj.status.clone(),
        uid: obj.metadata.uid.clone(),
    }
}
