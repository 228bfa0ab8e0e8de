//! Wire object shapes: type/object metadata and the generic managed object.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    identity::{ClusterId, ResourceIdentity},
    resource::ClusterKind,
};

/// apiVersion/kind pair identifying the schema of an object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    /// The version of the API the object belongs to.
    pub api_version: String,
    /// The kind of the object.
    pub kind: String,
}

impl TypeMeta {
    /// The TypeMeta of kind `K`.
    pub fn of<K: ClusterKind>() -> Self {
        Self {
            api_version: K::API_VERSION.to_string(),
            kind: K::KIND.to_string(),
        }
    }
}

/// Standard object metadata.
///
/// Maps are `BTreeMap` so serialized output is deterministic, which the
/// YAML codec's byte-identical guarantee relies on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name.
    pub name: String,
    /// Namespace; absent for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Object labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Object annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Opaque optimistic-concurrency token; required on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Server-assigned creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// A typed projection of one live cluster object.
///
/// Ephemeral by design: never cached beyond a single request/response.
/// Every mutating gateway call returns the fresh object so callers always
/// hold a current `resource_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject<S> {
    /// apiVersion and kind.
    #[serde(flatten)]
    pub types: TypeMeta,
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// The kind-specific payload.
    pub spec: S,
    /// Server-managed status, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl<S> ManagedObject<S> {
    /// A draft object of kind `K` ready for `create`.
    pub fn new<K: ClusterKind<Spec = S>>(
        name: impl Into<String>,
        namespace: Option<String>,
        spec: S,
    ) -> Self {
        Self {
            types: TypeMeta::of::<K>(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace,
                ..ObjectMeta::default()
            },
            spec,
            status: None,
        }
    }

    /// The identity of this object within `cluster`.
    pub fn identity(&self, cluster: ClusterId) -> ResourceIdentity {
        ResourceIdentity {
            cluster,
            kind: self.types.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// The current optimistic-concurrency token, if the object was read back.
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// The `status.phase` string when the server reports one.
    pub fn status_phase(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.get("phase"))
            .and_then(|p| p.as_str())
    }
}

/// One page of a filtered list, with the full filtered count.
///
/// `total` is computed over the complete filtered set before slicing, so it
/// can never desynchronize from the rows a UI shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// The requested page of items.
    pub items: Vec<T>,
    /// Number of items across all pages after filtering.
    pub total: usize,
}

/// Read-only pod projection used by workload detail views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSummary {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// `status.phase` as reported by the cluster.
    pub phase: Option<String>,
    /// (container name, image) pairs.
    pub containers: Vec<(String, String)>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}
