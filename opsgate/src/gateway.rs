//! The generic CRUD + YAML engine, parameterized by kind.
use serde_json::Value;

use opsgate_core::{
    codec,
    error::{Error, Result},
    object::{ManagedObject, Page},
    params::{DeleteOptions, ListQuery, PatchSet},
    resource::Scope,
    ClusterKind, ResourceIdentity,
};

use crate::{
    cluster::{ClusterClient, KindRef},
    registry::ClusterHandle,
};

/// Object CRUD for kind `K` against one resolved cluster.
///
/// One engine serves every kind; all per-kind behavior comes from
/// [`ClusterKind`]. Every mutating call returns the fresh object (with its
/// new `resource_version`) so callers never need a blind re-fetch.
#[derive(Clone)]
pub struct ObjectGateway<K> {
    handle: ClusterHandle,
    kind: KindRef,
    // `Empty` over `PhantomData`: we never hold a `K`, and `Empty<K>` stays `Send`.
    _phantom: std::iter::Empty<K>,
}

impl<K: ClusterKind> ObjectGateway<K> {
    /// Gateway over an already-resolved cluster.
    pub fn new(handle: ClusterHandle) -> Self {
        Self {
            handle,
            kind: KindRef::of::<K>(),
            _phantom: std::iter::empty(),
        }
    }

    /// The cluster this gateway talks to.
    pub fn handle(&self) -> &ClusterHandle {
        &self.handle
    }

    pub(crate) fn client(&self) -> &dyn ClusterClient {
        self.handle.client.as_ref()
    }

    pub(crate) fn kind_ref(&self) -> &KindRef {
        &self.kind
    }

    fn check_identity(&self, identity: &ResourceIdentity) -> Result<()> {
        identity.validate_for::<K>()?;
        if identity.cluster != self.handle.id {
            return Err(Error::Validation(format!(
                "identity addresses cluster {} but this gateway is bound to cluster {}",
                identity.cluster, self.handle.id
            )));
        }
        Ok(())
    }

    fn decode(&self, value: Value) -> Result<ManagedObject<K::Spec>> {
        serde_json::from_value(value).map_err(|e| {
            Error::UpstreamUnavailable(format!("cluster returned undecodable {}: {e}", K::KIND))
        })
    }

    fn encode(obj: &ManagedObject<K::Spec>) -> Result<Value> {
        serde_json::to_value(obj)
            .map_err(|e| Error::Validation(format!("cannot encode {}: {e}", K::KIND)))
    }

    /// Fetch one object.
    pub async fn get(&self, identity: &ResourceIdentity) -> Result<ManagedObject<K::Spec>> {
        self.check_identity(identity)?;
        let raw = self
            .client()
            .get(&self.kind, identity.namespace.as_deref(), &identity.name)
            .await?;
        self.decode(raw)
    }

    /// List one page of objects.
    ///
    /// The label selector is pushed down to the cluster. Search and status
    /// filters are applied before `total` is computed, so `total` is always
    /// the full filtered count, consistent with the returned rows.
    pub async fn list(
        &self,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Page<ManagedObject<K::Spec>>> {
        query.validate()?;
        if K::SCOPE == Scope::Cluster && namespace.is_some() {
            return Err(Error::Validation(format!(
                "{} is cluster-scoped; list must not scope by namespace",
                K::KIND
            )));
        }
        let selector = (!query.selector.is_empty()).then(|| query.selector.to_selector_string());
        let raw = self
            .client()
            .list(&self.kind, namespace, selector.as_deref())
            .await?;

        let mut items = Vec::with_capacity(raw.len());
        for value in raw {
            items.push(self.decode(value)?);
        }
        if let Some(needle) = &query.search {
            let needle = needle.to_lowercase();
            items.retain(|obj| obj.metadata.name.to_lowercase().contains(&needle));
        }
        if let Some(phase) = &query.status {
            items.retain(|obj| obj.status_phase() == Some(phase.as_str()));
        }
        let total = items.len();
        let (start, end) = query.bounds(total);
        let items = items.drain(start..end).collect();
        Ok(Page { items, total })
    }

    /// Create an object from a typed draft.
    pub async fn create(&self, obj: &ManagedObject<K::Spec>) -> Result<ManagedObject<K::Spec>> {
        if obj.types.kind != K::KIND {
            return Err(Error::Validation(format!(
                "draft is a {} but this gateway handles {}",
                obj.types.kind,
                K::KIND
            )));
        }
        let identity = obj.identity(self.handle.id);
        self.check_identity(&identity)?;
        K::validate_spec(&obj.spec)?;
        tracing::debug!(identity = %identity, "creating object");
        let raw = self
            .client()
            .create(&self.kind, identity.namespace.as_deref(), Self::encode(obj)?)
            .await?;
        self.decode(raw)
    }

    /// Create an object from a raw YAML manifest.
    ///
    /// A namespaced manifest may omit its namespace and inherit `namespace`;
    /// a manifest namespace that disagrees with `namespace` is an
    /// [`Error::IdentityMismatch`].
    pub async fn create_from_yaml(
        &self,
        namespace: Option<&str>,
        raw: &str,
    ) -> Result<ManagedObject<K::Spec>> {
        let mut obj = codec::parse_manifest::<K>(raw)?;
        match (&obj.metadata.namespace, namespace) {
            (Some(doc_ns), Some(ns)) if doc_ns != ns => {
                return Err(Error::IdentityMismatch {
                    expected: format!("{}/{ns}/{}", K::KIND, obj.metadata.name),
                    found: format!("{}/{doc_ns}/{}", K::KIND, obj.metadata.name),
                });
            }
            (None, Some(ns)) => obj.metadata.namespace = Some(ns.to_string()),
            _ => {}
        }
        self.create(&obj).await
    }

    /// Apply a partial structural update.
    ///
    /// Only fields present in `patch` are touched; the supplied
    /// `resource_version` is a strict precondition and a mismatch surfaces
    /// as [`Error::Conflict`] for the caller to re-fetch and retry. Label
    /// and annotation maps are replaced whole, so a key absent from the
    /// submitted map is removed from the object.
    pub async fn update(
        &self,
        identity: &ResourceIdentity,
        resource_version: &str,
        patch: &PatchSet,
    ) -> Result<ManagedObject<K::Spec>> {
        self.check_identity(identity)?;
        if resource_version.is_empty() {
            return Err(Error::Validation(
                "updates require the resource_version that was read".into(),
            ));
        }
        let mut body = patch.to_merge_patch()?;
        // Map replacement and image overrides both need the object as it
        // was read; one fetch serves all of them.
        if patch.labels.is_some() || patch.annotations.is_some() || !patch.images.is_empty() {
            let current = self.fetch_at_version(identity, resource_version).await?;
            if let Some(labels) = &patch.labels {
                body["metadata"]["labels"] =
                    map_replacement(current.pointer("/metadata/labels"), labels);
            }
            if let Some(annotations) = &patch.annotations {
                body["metadata"]["annotations"] =
                    map_replacement(current.pointer("/metadata/annotations"), annotations);
            }
            if !patch.images.is_empty() {
                body["spec"]["template"]["spec"]["containers"] =
                    Self::resolve_image_overrides(&current, identity, patch)?;
            }
        }
        body["metadata"]["resourceVersion"] = Value::String(resource_version.to_string());
        tracing::debug!(identity = %identity, "patching object");
        let raw = self
            .client()
            .merge_patch(
                &self.kind,
                identity.namespace.as_deref(),
                &identity.name,
                body,
            )
            .await?;
        self.decode(raw)
    }

    // The current object, failing fast if it moved past `resource_version`.
    async fn fetch_at_version(
        &self,
        identity: &ResourceIdentity,
        resource_version: &str,
    ) -> Result<Value> {
        let current = self
            .client()
            .get(&self.kind, identity.namespace.as_deref(), &identity.name)
            .await?;
        if current.pointer("/metadata/resourceVersion").and_then(Value::as_str)
            != Some(resource_version)
        {
            return Err(Error::Conflict(format!(
                "{identity} changed since it was read"
            )));
        }
        Ok(current)
    }

    // Merge patches replace arrays wholesale, so image overrides need the
    // current container list rewritten with the requested images.
    fn resolve_image_overrides(
        current: &Value,
        identity: &ResourceIdentity,
        patch: &PatchSet,
    ) -> Result<Value> {
        let mut containers = current
            .pointer("/spec/template/spec/containers")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                Error::Validation(format!("{} has no pod template to patch images on", K::KIND))
            })?;
        for (name, image) in &patch.images {
            let slot = containers
                .iter_mut()
                .find(|c| c.get("name").and_then(Value::as_str) == Some(name.as_str()))
                .ok_or_else(|| {
                    Error::Validation(format!("no container named {name:?} in {identity}"))
                })?;
            slot["image"] = Value::String(image.clone());
        }
        Ok(Value::Array(containers))
    }

    /// Replace an object from an edited YAML document.
    ///
    /// The document must address the same kind/name/namespace as `identity`
    /// and the supplied `resource_version` gates the write.
    pub async fn update_from_yaml(
        &self,
        identity: &ResourceIdentity,
        resource_version: &str,
        raw: &str,
    ) -> Result<ManagedObject<K::Spec>> {
        self.check_identity(identity)?;
        if resource_version.is_empty() {
            return Err(Error::Validation(
                "updates require the resource_version that was read".into(),
            ));
        }
        let mut obj = codec::from_yaml::<K>(raw, identity)?;
        obj.metadata.resource_version = Some(resource_version.to_string());
        tracing::debug!(identity = %identity, "replacing object from yaml");
        let raw = self
            .client()
            .replace(
                &self.kind,
                identity.namespace.as_deref(),
                &identity.name,
                Self::encode(&obj)?,
            )
            .await?;
        self.decode(raw)
    }

    /// Delete an object.
    ///
    /// Idempotent by default: deleting an already-absent object succeeds
    /// unless [`DeleteOptions::strict`] was requested.
    pub async fn delete(&self, identity: &ResourceIdentity, options: &DeleteOptions) -> Result<()> {
        self.check_identity(identity)?;
        tracing::debug!(identity = %identity, force = options.force, "deleting object");
        match self
            .client()
            .delete(
                &self.kind,
                identity.namespace.as_deref(),
                &identity.name,
                options.force,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => match Error::from(err) {
                Error::NotFound(_) if !options.strict => Ok(()),
                err => Err(err),
            },
        }
    }

    /// Delete many objects, isolating per-item failures.
    ///
    /// One failing delete never aborts the rest; the aggregate reports both
    /// successes and failures.
    pub async fn batch_delete(
        &self,
        identities: &[ResourceIdentity],
        options: &DeleteOptions,
    ) -> Vec<(ResourceIdentity, Result<()>)> {
        let mut results = Vec::with_capacity(identities.len());
        for identity in identities {
            let outcome = self.delete(identity, options).await;
            if let Err(err) = &outcome {
                tracing::warn!(identity = %identity, error = %err, "batch delete item failed");
            }
            results.push((identity.clone(), outcome));
        }
        results
    }
}

// A merge-patch fragment that makes the stored map equal `desired`: every
// desired pair, plus an explicit null for each current key left out.
fn map_replacement(current: Option<&Value>, desired: &std::collections::BTreeMap<String, String>) -> Value {
    let mut fragment = serde_json::Map::new();
    for (key, value) in desired {
        fragment.insert(key.clone(), Value::String(value.clone()));
    }
    if let Some(existing) = current.and_then(Value::as_object) {
        for key in existing.keys() {
            if !desired.contains_key(key) {
                fragment.insert(key.clone(), Value::Null);
            }
        }
    }
    Value::Object(fragment)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cluster::MemCluster;
    use opsgate_core::{
        resource::{ClusterRoleBinding, Deployment},
        specs::{ContainerSpec, PodSpec, PodTemplate, WorkloadSpec},
        ClusterId, ListQuery, Selector,
    };
    use secrecy::SecretString;

    fn test_handle() -> (ClusterHandle, Arc<MemCluster>) {
        let cluster = Arc::new(MemCluster::new());
        let handle = ClusterHandle::new(
            ClusterId(1),
            "https://mem.internal:6443",
            "test",
            SecretString::from("token"),
            cluster.clone(),
        );
        (handle, cluster)
    }

    fn deployment_spec(replicas: i64, image: &str) -> WorkloadSpec {
        WorkloadSpec {
            replicas: Some(replicas),
            template: PodTemplate {
                spec: PodSpec {
                    containers: vec![ContainerSpec {
                        name: "app".into(),
                        image: image.into(),
                        ..ContainerSpec::default()
                    }],
                    ..PodSpec::default()
                },
                ..PodTemplate::default()
            },
            ..WorkloadSpec::default()
        }
    }

    fn draft(name: &str, replicas: i64) -> ManagedObject<WorkloadSpec> {
        ManagedObject::new::<Deployment>(name, Some("default".into()), deployment_spec(replicas, "nginx:latest"))
    }

    #[tokio::test]
    async fn created_object_projects_back_unchanged() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let created = gw.create(&draft("web", 2)).await.unwrap();
        assert!(created.resource_version().is_some());

        let fetched = gw.get(&created.identity(ClusterId(1))).await.unwrap();
        assert_eq!(fetched.spec, draft("web", 2).spec);
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        gw.create(&draft("web", 1)).await.unwrap();
        assert!(matches!(
            gw.create(&draft("web", 1)).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_before_counting() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        for name in ["web-a", "web-b", "api"] {
            let mut obj = draft(name, 1);
            obj.metadata.labels.insert("team".into(), "infra".into());
            gw.create(&obj).await.unwrap();
        }

        let page = gw
            .list(Some("default"), &ListQuery::default().search("web").page(1, 1))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].metadata.name, "web-a");

        let filtered = gw
            .list(
                Some("default"),
                &ListQuery::default().labels(Selector::parse("team=infra").unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(filtered.total, 3);

        let none = gw
            .list(
                Some("default"),
                &ListQuery::default().labels(Selector::parse("team=web").unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(none.total, 0);
    }

    #[tokio::test]
    async fn patch_touches_only_requested_fields() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let created = gw.create(&draft("web", 3)).await.unwrap();
        let id = created.identity(ClusterId(1));

        let mut labels = std::collections::BTreeMap::new();
        labels.insert("tier".to_string(), "frontend".to_string());
        let updated = gw
            .update(&id, created.resource_version().unwrap(), &PatchSet::labels(labels))
            .await
            .unwrap();
        assert_eq!(updated.metadata.labels.get("tier").unwrap(), "frontend");
        assert_eq!(updated.spec.replicas, Some(3));
        assert_ne!(updated.resource_version(), created.resource_version());
    }

    #[tokio::test]
    async fn label_patch_replaces_the_whole_map() -> anyhow::Result<()> {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let mut obj = draft("web", 1);
        obj.metadata.labels.insert("deprecated".into(), "yes".into());
        obj.metadata.labels.insert("team".into(), "infra".into());
        obj.metadata.annotations.insert("note".into(), "old".into());
        let created = gw.create(&obj).await?;
        let id = created.identity(ClusterId(1));

        // The submitted map is the complete desired state; `deprecated`
        // being absent deletes it.
        let mut desired = std::collections::BTreeMap::new();
        desired.insert("team".to_string(), "infra".to_string());
        let updated = gw
            .update(&id, created.resource_version().unwrap(), &PatchSet::labels(desired.clone()))
            .await?;
        assert_eq!(updated.metadata.labels, desired);
        assert_eq!(updated.metadata.annotations.get("note").map(String::as_str), Some("old"));

        let cleared = gw
            .update(
                &id,
                updated.resource_version().unwrap(),
                &PatchSet::annotations(std::collections::BTreeMap::new()),
            )
            .await?;
        assert!(cleared.metadata.annotations.is_empty());
        assert_eq!(cleared.metadata.labels, desired);
        Ok(())
    }

    #[tokio::test]
    async fn image_override_rewrites_one_container() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let created = gw.create(&draft("web", 1)).await.unwrap();
        let id = created.identity(ClusterId(1));

        let updated = gw
            .update(
                &id,
                created.resource_version().unwrap(),
                &PatchSet::default().image("app", "nginx:1.27"),
            )
            .await
            .unwrap();
        assert_eq!(updated.spec.template.spec.containers[0].image, "nginx:1.27");

        let err = gw
            .update(
                &id,
                updated.resource_version().unwrap(),
                &PatchSet::default().image("missing", "x:y"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn concurrent_stale_updates_have_exactly_one_winner() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let created = gw.create(&draft("web", 1)).await.unwrap();
        let id = created.identity(ClusterId(1));
        let stale = created.resource_version().unwrap().to_string();

        let a = {
            let gw = gw.clone();
            let id = id.clone();
            let rv = stale.clone();
            tokio::spawn(async move { gw.update(&id, &rv, &PatchSet::replicas(5)).await })
        };
        let b = {
            let gw = gw.clone();
            let id = id.clone();
            let rv = stale.clone();
            tokio::spawn(async move { gw.update(&id, &rv, &PatchSet::replicas(9)).await })
        };
        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        let wins = outcomes.iter().filter(|o| o.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|o| matches!(o, Err(Error::Conflict(_))))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn yaml_update_rejects_renames_and_stale_versions() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let created = gw.create(&draft("web", 1)).await.unwrap();
        let id = created.identity(ClusterId(1));

        let mut renamed = created.clone();
        renamed.metadata.name = "web2".into();
        let yaml = opsgate_core::codec::to_yaml(&renamed).unwrap();
        assert!(matches!(
            gw.update_from_yaml(&id, created.resource_version().unwrap(), &yaml).await,
            Err(Error::IdentityMismatch { .. })
        ));

        let mut edited = created.clone();
        edited.spec.replicas = Some(4);
        let yaml = opsgate_core::codec::to_yaml(&edited).unwrap();
        let fresh = gw
            .update_from_yaml(&id, created.resource_version().unwrap(), &yaml)
            .await
            .unwrap();
        assert_eq!(fresh.spec.replicas, Some(4));

        // The first write bumped the version; replaying the old one conflicts.
        assert!(matches!(
            gw.update_from_yaml(&id, created.resource_version().unwrap(), &yaml).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent_unless_strict() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let created = gw.create(&draft("web", 1)).await.unwrap();
        let id = created.identity(ClusterId(1));

        gw.delete(&id, &DeleteOptions::default()).await.unwrap();
        gw.delete(&id, &DeleteOptions::default()).await.unwrap();
        assert!(matches!(
            gw.delete(&id, &DeleteOptions::default().strict()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn batch_delete_isolates_failures() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let mut created = Vec::new();
        for name in ["a", "b", "c"] {
            created.push(gw.create(&draft(name, 1)).await.unwrap().identity(ClusterId(1)));
        }
        let missing =
            opsgate_core::ResourceIdentity::namespaced::<Deployment>(ClusterId(1), "default", "ghost");
        let mut targets = created.clone();
        targets.insert(1, missing.clone());

        let results = gw
            .batch_delete(&targets, &DeleteOptions::default().strict())
            .await;
        assert_eq!(results.len(), 4);
        let failures: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, missing);
        for id in &created {
            assert!(matches!(
                gw.get(id).await,
                Err(Error::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn cluster_scoped_kinds_reject_namespaces() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<ClusterRoleBinding> = ObjectGateway::new(handle);
        assert!(matches!(
            gw.list(Some("default"), &ListQuery::default()).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn create_from_yaml_inherits_namespace() {
        let (handle, _) = test_handle();
        let gw: ObjectGateway<Deployment> = ObjectGateway::new(handle);
        let yaml = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 1\n";
        let created = gw.create_from_yaml(Some("default"), yaml).await.unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("default"));

        assert!(matches!(
            gw.create_from_yaml(Some("other"), &opsgate_core::codec::to_yaml(&created).unwrap())
                .await,
            Err(Error::IdentityMismatch { .. })
        ));
    }
}
