//! Kind metadata: the trait every addressable kind implements.
use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::Result,
    quantity,
    specs::{ConfigMapData, PodSpec, SecretData, WorkloadSpec},
};

/// Whether a kind lives in a namespace or at cluster level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Objects are addressed by (namespace, name).
    Namespaced,
    /// Objects are addressed by name alone.
    Cluster,
}

/// Static metadata for a kind the gateway can operate on.
///
/// This is the only per-kind code in the system: everything else is the one
/// generic engine parameterized by it.
pub trait ClusterKind: Sized + Send + Sync + 'static {
    /// Kind name as it appears on the wire, e.g. `Deployment`.
    const KIND: &'static str;
    /// The apiVersion of the kind, e.g. `apps/v1`.
    const API_VERSION: &'static str;
    /// Lowercase plural used in API paths, e.g. `deployments`.
    const PLURAL: &'static str;
    /// Namespaced or cluster-scoped.
    const SCOPE: Scope;

    /// The kind-specific payload carried under `spec` (or `data`).
    type Spec: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync + 'static;

    /// Kind-specific payload validation, run at the codec/gateway boundary
    /// before any cluster round-trip.
    fn validate_spec(_spec: &Self::Spec) -> Result<()> {
        Ok(())
    }
}

/// Marker for the workload kinds sharing rollout lifecycle verbs.
pub trait WorkloadKind: ClusterKind<Spec = WorkloadSpec> {
    /// Only Deployments support pause/resume.
    const SUPPORTS_PAUSE: bool;
}

fn validate_workload(spec: &WorkloadSpec) -> Result<()> {
    if let Some(replicas) = spec.replicas {
        if replicas < 0 {
            return Err(crate::error::Error::Validation(format!(
                "replicas must be >= 0, got {replicas}"
            )));
        }
    }
    Ok(())
}

macro_rules! workload_kind {
    ($name:ident, $kind:literal, $plural:literal, pause = $pause:literal) => {
        #[doc = concat!("The `", $kind, "` workload kind.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl ClusterKind for $name {
            const KIND: &'static str = $kind;
            const API_VERSION: &'static str = "apps/v1";
            const PLURAL: &'static str = $plural;
            const SCOPE: Scope = Scope::Namespaced;
            type Spec = WorkloadSpec;

            fn validate_spec(spec: &Self::Spec) -> Result<()> {
                validate_workload(spec)
            }
        }

        impl WorkloadKind for $name {
            const SUPPORTS_PAUSE: bool = $pause;
        }
    };
}

macro_rules! raw_kind {
    ($name:ident, $kind:literal, $version:literal, $plural:literal, $scope:expr) => {
        #[doc = concat!("The `", $kind, "` kind, carried as a raw payload.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl ClusterKind for $name {
            const KIND: &'static str = $kind;
            const API_VERSION: &'static str = $version;
            const PLURAL: &'static str = $plural;
            const SCOPE: Scope = $scope;
            type Spec = serde_json::Value;
        }
    };
}

workload_kind!(Deployment, "Deployment", "deployments", pause = true);
workload_kind!(StatefulSet, "StatefulSet", "statefulsets", pause = false);
workload_kind!(DaemonSet, "DaemonSet", "daemonsets", pause = false);

/// The `Pod` kind.
#[derive(Debug, Clone, Copy)]
pub struct Pod;

impl ClusterKind for Pod {
    const KIND: &'static str = "Pod";
    const API_VERSION: &'static str = "v1";
    const PLURAL: &'static str = "pods";
    const SCOPE: Scope = Scope::Namespaced;
    type Spec = PodSpec;
}

/// The `ConfigMap` kind.
#[derive(Debug, Clone, Copy)]
pub struct ConfigMap;

impl ClusterKind for ConfigMap {
    const KIND: &'static str = "ConfigMap";
    const API_VERSION: &'static str = "v1";
    const PLURAL: &'static str = "configmaps";
    const SCOPE: Scope = Scope::Namespaced;
    type Spec = ConfigMapData;
}

/// The `Secret` kind; values are opaque bytes transported as base64.
#[derive(Debug, Clone, Copy)]
pub struct Secret;

impl ClusterKind for Secret {
    const KIND: &'static str = "Secret";
    const API_VERSION: &'static str = "v1";
    const PLURAL: &'static str = "secrets";
    const SCOPE: Scope = Scope::Namespaced;
    type Spec = SecretData;
}

/// The `PersistentVolumeClaim` kind.
#[derive(Debug, Clone, Copy)]
pub struct PersistentVolumeClaim;

impl ClusterKind for PersistentVolumeClaim {
    const KIND: &'static str = "PersistentVolumeClaim";
    const API_VERSION: &'static str = "v1";
    const PLURAL: &'static str = "persistentvolumeclaims";
    const SCOPE: Scope = Scope::Namespaced;
    type Spec = serde_json::Value;

    fn validate_spec(spec: &Self::Spec) -> Result<()> {
        // Storage requests must be valid Kubernetes quantities before we
        // let them anywhere near a cluster.
        if let Some(storage) = spec
            .pointer("/resources/requests/storage")
            .and_then(|v| v.as_str())
        {
            quantity::validate_quantity(storage)?;
        }
        Ok(())
    }
}

raw_kind!(Service, "Service", "v1", "services", Scope::Namespaced);
raw_kind!(
    Ingress,
    "Ingress",
    "networking.k8s.io/v1",
    "ingresses",
    Scope::Namespaced
);
raw_kind!(
    PersistentVolume,
    "PersistentVolume",
    "v1",
    "persistentvolumes",
    Scope::Cluster
);
raw_kind!(
    Role,
    "Role",
    "rbac.authorization.k8s.io/v1",
    "roles",
    Scope::Namespaced
);
raw_kind!(
    RoleBinding,
    "RoleBinding",
    "rbac.authorization.k8s.io/v1",
    "rolebindings",
    Scope::Namespaced
);
raw_kind!(
    ClusterRoleBinding,
    "ClusterRoleBinding",
    "rbac.authorization.k8s.io/v1",
    "clusterrolebindings",
    Scope::Cluster
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn workload_spec_rejects_negative_replicas() {
        let spec = WorkloadSpec {
            replicas: Some(-1),
            ..WorkloadSpec::default()
        };
        assert!(Deployment::validate_spec(&spec).is_err());
    }

    #[test]
    fn pvc_storage_quantity_is_checked() {
        let good = json!({"resources": {"requests": {"storage": "10Gi"}}});
        assert!(PersistentVolumeClaim::validate_spec(&good).is_ok());

        let bad = json!({"resources": {"requests": {"storage": "10Gigabytes"}}});
        assert!(PersistentVolumeClaim::validate_spec(&bad).is_err());
    }

    #[test]
    fn scopes_are_declared_correctly() {
        assert_eq!(Deployment::SCOPE, Scope::Namespaced);
        assert_eq!(PersistentVolume::SCOPE, Scope::Cluster);
        assert_eq!(ClusterRoleBinding::SCOPE, Scope::Cluster);
    }
}
