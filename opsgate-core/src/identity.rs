//! Object addressing: the (cluster, kind, namespace, name) tuple.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    resource::{ClusterKind, Scope},
};

/// Numeric id of a registered cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(
    /// The raw numeric id as stored by the console.
    pub i64,
);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for ClusterId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The unique key for all object operations.
///
/// Two identities are equal iff all four fields match. `namespace` is
/// mandatory for namespaced kinds and forbidden for cluster-scoped kinds;
/// violations are a [`Error::Validation`], never silently corrected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// The cluster the object lives in.
    pub cluster: ClusterId,
    /// Kind name, e.g. `Deployment`.
    pub kind: String,
    /// Namespace; `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ResourceIdentity {
    /// Identity for a namespaced kind `K`.
    pub fn namespaced<K: ClusterKind>(
        cluster: ClusterId,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            kind: K::KIND.to_string(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Identity for a cluster-scoped kind `K`.
    pub fn cluster_scoped<K: ClusterKind>(cluster: ClusterId, name: impl Into<String>) -> Self {
        Self {
            cluster,
            kind: K::KIND.to_string(),
            namespace: None,
            name: name.into(),
        }
    }

    /// Check this identity is well-formed for kind `K`.
    pub fn validate_for<K: ClusterKind>(&self) -> Result<()> {
        if self.kind != K::KIND {
            return Err(Error::Validation(format!(
                "identity kind {} does not address {}",
                self.kind,
                K::KIND
            )));
        }
        if self.name.is_empty() {
            return Err(Error::Validation("identity name must not be empty".into()));
        }
        match (K::SCOPE, &self.namespace) {
            (Scope::Namespaced, None) => Err(Error::Validation(format!(
                "{} is namespaced; identity for {:?} lacks a namespace",
                K::KIND,
                self.name
            ))),
            (Scope::Namespaced, Some(ns)) if ns.is_empty() => Err(Error::Validation(format!(
                "{} is namespaced; identity for {:?} has an empty namespace",
                K::KIND,
                self.name
            ))),
            (Scope::Cluster, Some(_)) => Err(Error::Validation(format!(
                "{} is cluster-scoped; identity for {:?} must not carry a namespace",
                K::KIND,
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "cluster {}: {}/{}/{}", self.cluster, self.kind, ns, self.name),
            None => write!(f, "cluster {}: {}/{}", self.cluster, self.kind, self.name),
        }
    }
}
