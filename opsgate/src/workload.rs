//! Kind-aware lifecycle verbs for Deployment/StatefulSet/DaemonSet.
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use opsgate_core::{
    error::{Error, Result},
    object::{ManagedObject, PodSummary},
    resource::Pod,
    specs::{PodSpec, PodTemplate, WorkloadSpec},
    ResourceIdentity, WorkloadKind,
};

use crate::{cluster::KindRef, gateway::ObjectGateway};

/// Label carrying the owning workload's name on revision records.
const OWNER_LABEL: &str = "opsgate.io/owner";
/// Label carrying the owning workload's kind on revision records.
const OWNER_KIND_LABEL: &str = "opsgate.io/owner-kind";
/// Pod-template annotation bumped by rollout restarts.
const RESTARTED_AT: &str = "opsgate.io/restarted-at";

/// One recorded historical rollout state of a workload.
///
/// History is append-only per identity; rollback records a new revision
/// rather than deleting or renumbering old ones.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutRevision {
    /// Monotonic revision number.
    pub revision: i64,
    /// Hash of the pod template this revision captured.
    pub template_hash: String,
    /// When the revision was recorded.
    pub created_at: Option<DateTime<Utc>>,
}

/// Derived (never stored) rollout state of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutStatus {
    /// All desired replicas are updated and ready.
    Running,
    /// A spec change is still propagating.
    Updating,
    /// A crash condition persisted past the grace window.
    Error,
    /// Explicitly paused; only reachable/leavable via pause/resume.
    Paused,
}

/// Lifecycle orchestration for workload kind `K`, built only atop
/// [`ObjectGateway`] and cluster primitives.
pub struct WorkloadController<K: WorkloadKind> {
    gateway: ObjectGateway<K>,
    revisions: KindRef,
}

impl<K: WorkloadKind> WorkloadController<K> {
    /// Grace window a crash condition must persist before the derived
    /// status flips to [`RolloutStatus::Error`].
    pub const ERROR_GRACE: Duration = Duration::from_secs(120);

    /// Controller over an object gateway.
    pub fn new(gateway: ObjectGateway<K>) -> Self {
        Self {
            gateway,
            revisions: KindRef::controller_revision(),
        }
    }

    /// The underlying gateway.
    pub fn gateway(&self) -> &ObjectGateway<K> {
        &self.gateway
    }

    /// Set the replica count.
    ///
    /// Negative values fail with [`Error::Validation`] before any cluster
    /// round-trip. Scaling does not record a revision.
    pub async fn scale(
        &self,
        identity: &ResourceIdentity,
        resource_version: &str,
        replicas: i64,
    ) -> Result<ManagedObject<WorkloadSpec>> {
        if replicas < 0 {
            return Err(Error::Validation(format!(
                "replicas must be >= 0, got {replicas}"
            )));
        }
        tracing::info!(identity = %identity, replicas, "scaling workload");
        self.patch_with_version(
            identity,
            resource_version,
            json!({"spec": {"replicas": replicas}}),
        )
        .await
    }

    /// Rollout-restart: bump a pod-template annotation so the cluster rolls
    /// new pods. The workload object itself is never deleted or recreated.
    /// Records exactly one new revision.
    pub async fn restart(&self, identity: &ResourceIdentity) -> Result<ManagedObject<WorkloadSpec>> {
        let current = self.gateway.get(identity).await?;
        let resource_version = current
            .resource_version()
            .ok_or_else(|| Error::Validation(format!("{identity} has no resource_version")))?
            .to_string();

        let stamp = Utc::now().to_rfc3339();
        let mut template = current.spec.template.clone();
        template
            .metadata
            .annotations
            .insert(RESTARTED_AT.to_string(), stamp.clone());

        let next = self.next_revision_number(identity).await?;
        tracing::info!(identity = %identity, revision = next, "restarting workload");
        let updated = self
            .patch_with_version(
                identity,
                &resource_version,
                json!({"spec": {"template": {"metadata": {"annotations": {RESTARTED_AT: stamp}}}}}),
            )
            .await?;
        // Recorded only once the patch landed; a failed restart must not
        // leave a phantom revision for the retry to double up on.
        self.record_revision(identity, next, &template).await?;
        Ok(updated)
    }

    /// Pause the rollout. Deployment-only.
    pub async fn pause(&self, identity: &ResourceIdentity) -> Result<ManagedObject<WorkloadSpec>> {
        self.set_paused(identity, true).await
    }

    /// Resume a paused rollout. Deployment-only.
    pub async fn resume(&self, identity: &ResourceIdentity) -> Result<ManagedObject<WorkloadSpec>> {
        self.set_paused(identity, false).await
    }

    async fn set_paused(
        &self,
        identity: &ResourceIdentity,
        paused: bool,
    ) -> Result<ManagedObject<WorkloadSpec>> {
        if !K::SUPPORTS_PAUSE {
            return Err(Error::UnsupportedOperation(format!(
                "{} does not support pause/resume",
                K::KIND
            )));
        }
        let current = self.gateway.get(identity).await?;
        let resource_version = current
            .resource_version()
            .ok_or_else(|| Error::Validation(format!("{identity} has no resource_version")))?
            .to_string();
        tracing::info!(identity = %identity, paused, "toggling rollout pause");
        self.patch_with_version(identity, &resource_version, json!({"spec": {"paused": paused}}))
            .await
    }

    /// Roll the pod template back to `target_revision`.
    ///
    /// The rollback itself is recorded as a new revision with the next
    /// monotonic number; `target_revision`'s number is never reused.
    pub async fn rollback(
        &self,
        identity: &ResourceIdentity,
        target_revision: i64,
    ) -> Result<ManagedObject<WorkloadSpec>> {
        let history = self.stored_revisions(identity).await?;
        let target = history
            .iter()
            .find(|(rev, _, _)| *rev == target_revision)
            .ok_or(Error::RevisionNotFound(target_revision))?;
        let template: PodTemplate = serde_json::from_value(target.1.clone()).map_err(|e| {
            Error::UpstreamUnavailable(format!("stored revision {target_revision} is undecodable: {e}"))
        })?;

        let current = self.gateway.get(identity).await?;
        let resource_version = current
            .resource_version()
            .ok_or_else(|| Error::Validation(format!("{identity} has no resource_version")))?
            .to_string();

        let next = history.iter().map(|(rev, _, _)| *rev).max().unwrap_or(0) + 1;
        tracing::info!(identity = %identity, target_revision, revision = next, "rolling back workload");
        let updated = self
            .patch_with_version(
                identity,
                &resource_version,
                json!({"spec": {"template": serde_json::to_value(&template).map_err(|e| {
                    Error::Validation(format!("cannot encode template: {e}"))
                })?}}),
            )
            .await?;
        self.record_revision(identity, next, &template).await?;
        Ok(updated)
    }

    /// The recorded rollout history, newest first.
    pub async fn list_revision_history(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<Vec<RolloutRevision>> {
        let mut revisions: Vec<RolloutRevision> = self
            .stored_revisions(identity)
            .await?
            .into_iter()
            .map(|(revision, template, created_at)| RolloutRevision {
                revision,
                template_hash: template_hash(&template),
                created_at,
            })
            .collect();
        revisions.sort_by_key(|r| std::cmp::Reverse(r.revision));
        Ok(revisions)
    }

    /// The pods currently matched by the workload's selector.
    pub async fn list_pods(&self, identity: &ResourceIdentity) -> Result<Vec<PodSummary>> {
        let workload = self.gateway.get(identity).await?;
        let mut selector = workload.spec.selector.match_labels.clone();
        if selector.is_empty() {
            selector = workload.spec.template.metadata.labels.clone();
        }
        if selector.is_empty() {
            return Ok(Vec::new());
        }
        let selector = opsgate_core::Selector::from_map(selector);
        let raw = self
            .gateway
            .client()
            .list(
                &KindRef::of::<Pod>(),
                identity.namespace.as_deref(),
                Some(&selector.to_selector_string()),
            )
            .await?;
        let mut pods = Vec::with_capacity(raw.len());
        for value in raw {
            let pod: ManagedObject<PodSpec> = serde_json::from_value(value).map_err(|e| {
                Error::UpstreamUnavailable(format!("cluster returned undecodable Pod: {e}"))
            })?;
            pods.push(PodSummary {
                name: pod.metadata.name.clone(),
                namespace: pod.metadata.namespace.clone().unwrap_or_default(),
                phase: pod.status_phase().map(str::to_string),
                containers: pod
                    .spec
                    .containers
                    .iter()
                    .map(|c| (c.name.clone(), c.image.clone()))
                    .collect(),
                created_at: pod.metadata.creation_timestamp,
            });
        }
        Ok(pods)
    }

    async fn patch_with_version(
        &self,
        identity: &ResourceIdentity,
        resource_version: &str,
        mut patch: Value,
    ) -> Result<ManagedObject<WorkloadSpec>> {
        patch["metadata"]["resourceVersion"] = Value::String(resource_version.to_string());
        let raw = self
            .gateway
            .client()
            .merge_patch(
                self.gateway.kind_ref(),
                identity.namespace.as_deref(),
                &identity.name,
                patch,
            )
            .await?;
        serde_json::from_value(raw).map_err(|e| {
            Error::UpstreamUnavailable(format!("cluster returned undecodable {}: {e}", K::KIND))
        })
    }

    fn revision_name(identity: &ResourceIdentity, revision: i64) -> String {
        format!("{}-{}-{revision}", K::PLURAL, identity.name)
    }

    async fn record_revision(
        &self,
        identity: &ResourceIdentity,
        revision: i64,
        template: &PodTemplate,
    ) -> Result<()> {
        let template = serde_json::to_value(template)
            .map_err(|e| Error::Validation(format!("cannot encode template: {e}")))?;
        let body = json!({
            "apiVersion": self.revisions.api_version,
            "kind": self.revisions.kind,
            "metadata": {
                "name": Self::revision_name(identity, revision),
                "namespace": identity.namespace,
                "labels": {
                    OWNER_LABEL: identity.name,
                    OWNER_KIND_LABEL: K::KIND,
                },
            },
            "revision": revision,
            "data": {"template": template},
        });
        self.gateway
            .client()
            .create(&self.revisions, identity.namespace.as_deref(), body)
            .await?;
        Ok(())
    }

    async fn next_revision_number(&self, identity: &ResourceIdentity) -> Result<i64> {
        let history = self.stored_revisions(identity).await?;
        Ok(history.iter().map(|(rev, _, _)| *rev).max().unwrap_or(0) + 1)
    }

    // (revision number, template value, created_at) triples, unordered.
    async fn stored_revisions(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<Vec<(i64, Value, Option<DateTime<Utc>>)>> {
        identity.validate_for::<K>()?;
        let selector = format!("{OWNER_LABEL}={},{OWNER_KIND_LABEL}={}", identity.name, K::KIND);
        let raw = self
            .gateway
            .client()
            .list(&self.revisions, identity.namespace.as_deref(), Some(&selector))
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(|value| {
                let revision = value.get("revision").and_then(Value::as_i64)?;
                let template = value.pointer("/data/template").cloned()?;
                let created_at = value
                    .pointer("/metadata/creationTimestamp")
                    .and_then(|ts| serde_json::from_value(ts.clone()).ok());
                Some((revision, template, created_at))
            })
            .collect())
    }
}

fn template_hash(template: &Value) -> String {
    let canonical = serde_json::to_string(template).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Derive a workload's rollout status from its spec and server-reported
/// status. Never stored; recomputed per request.
///
/// `Paused` is only reachable through the explicit pause flag. A crash
/// condition (`CrashLoopBackOff`, `ImagePullBackOff`) must persist past
/// `grace` before the status degrades to `Error`.
pub fn rollout_status(obj: &ManagedObject<WorkloadSpec>, grace: Duration) -> RolloutStatus {
    if obj.spec.paused == Some(true) {
        return RolloutStatus::Paused;
    }
    let status = obj.status.as_ref();
    if let Some(conditions) = status
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
    {
        for condition in conditions {
            let reason = condition.get("reason").and_then(Value::as_str).unwrap_or("");
            if reason != "CrashLoopBackOff" && reason != "ImagePullBackOff" {
                continue;
            }
            let since = condition
                .get("lastTransitionTime")
                .and_then(|ts| serde_json::from_value::<DateTime<Utc>>(ts.clone()).ok());
            let persisted = since
                .map(|ts| Utc::now().signed_duration_since(ts).num_seconds() as u64)
                .unwrap_or(u64::MAX);
            if persisted >= grace.as_secs() {
                return RolloutStatus::Error;
            }
        }
    }
    let desired = obj.spec.replicas.unwrap_or(1);
    let ready = status
        .and_then(|s| s.get("readyReplicas"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let updated = status
        .and_then(|s| s.get("updatedReplicas"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if desired == 0 || (ready >= desired && updated >= desired) {
        RolloutStatus::Running
    } else {
        RolloutStatus::Updating
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        cluster::{ClusterClient, ClusterError, MemCluster},
        registry::ClusterHandle,
    };
    use opsgate_core::{
        resource::{Deployment, StatefulSet},
        specs::{ContainerSpec, LabelSelector},
        ClusterId, ClusterStatus,
    };
    use secrecy::SecretString;

    fn controller<K: WorkloadKind>() -> (WorkloadController<K>, Arc<MemCluster>) {
        let cluster = Arc::new(MemCluster::new());
        let handle = ClusterHandle::new(
            ClusterId(1),
            "https://mem.internal:6443",
            "test",
            SecretString::from("token"),
            cluster.clone(),
        );
        (WorkloadController::new(ObjectGateway::new(handle)), cluster)
    }

    fn web_draft(image: &str) -> ManagedObject<WorkloadSpec> {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        let spec = WorkloadSpec {
            replicas: Some(2),
            selector: LabelSelector {
                match_labels: labels.clone(),
            },
            template: PodTemplate {
                metadata: opsgate_core::specs::TemplateMeta {
                    labels,
                    ..Default::default()
                },
                spec: PodSpec {
                    containers: vec![ContainerSpec {
                        name: "app".into(),
                        image: image.into(),
                        ..ContainerSpec::default()
                    }],
                    ..PodSpec::default()
                },
            },
            ..WorkloadSpec::default()
        };
        ManagedObject::new::<Deployment>("web", Some("default".into()), spec)
    }

    #[tokio::test]
    async fn scale_restart_rollback_scenario() {
        let (ctl, _) = controller::<Deployment>();
        let created = ctl.gateway().create(&web_draft("nginx:latest")).await.unwrap();
        let id = created.identity(ClusterId(1));

        // Scale with the version returned at create time.
        let scaled = ctl
            .scale(&id, created.resource_version().unwrap(), 5)
            .await
            .unwrap();
        assert_eq!(scaled.spec.replicas, Some(5));
        // Scale is not a revision.
        assert!(ctl.list_revision_history(&id).await.unwrap().is_empty());

        assert!(matches!(
            ctl.rollback(&id, 99).await,
            Err(Error::RevisionNotFound(99))
        ));

        ctl.restart(&id).await.unwrap();
        let history = ctl.list_revision_history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].revision, 1);
    }

    // Delegates to a real in-memory cluster but can be told to refuse merge
    // patches, the way a concurrent writer between read and write would.
    struct PatchOutage {
        inner: MemCluster,
        refuse_patches: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ClusterClient for PatchOutage {
        async fn get(
            &self,
            kind: &KindRef,
            namespace: Option<&str>,
            name: &str,
        ) -> std::result::Result<Value, ClusterError> {
            self.inner.get(kind, namespace, name).await
        }
        async fn list(
            &self,
            kind: &KindRef,
            namespace: Option<&str>,
            label_selector: Option<&str>,
        ) -> std::result::Result<Vec<Value>, ClusterError> {
            self.inner.list(kind, namespace, label_selector).await
        }
        async fn create(
            &self,
            kind: &KindRef,
            namespace: Option<&str>,
            body: Value,
        ) -> std::result::Result<Value, ClusterError> {
            self.inner.create(kind, namespace, body).await
        }
        async fn replace(
            &self,
            kind: &KindRef,
            namespace: Option<&str>,
            name: &str,
            body: Value,
        ) -> std::result::Result<Value, ClusterError> {
            self.inner.replace(kind, namespace, name, body).await
        }
        async fn merge_patch(
            &self,
            kind: &KindRef,
            namespace: Option<&str>,
            name: &str,
            patch: Value,
        ) -> std::result::Result<Value, ClusterError> {
            if self.refuse_patches.load(Ordering::SeqCst) {
                return Err(ClusterError::Api(ClusterStatus::new(
                    409,
                    "Conflict",
                    format!("operation cannot be fulfilled on {name:?}: the object has been modified"),
                )));
            }
            self.inner.merge_patch(kind, namespace, name, patch).await
        }
        async fn delete(
            &self,
            kind: &KindRef,
            namespace: Option<&str>,
            name: &str,
            force: bool,
        ) -> std::result::Result<(), ClusterError> {
            self.inner.delete(kind, namespace, name, force).await
        }
        async fn pod_logs(
            &self,
            namespace: &str,
            pod: &str,
            options: &opsgate_core::LogOptions,
        ) -> std::result::Result<crate::cluster::LogStream, ClusterError> {
            self.inner.pod_logs(namespace, pod, options).await
        }
        async fn pod_exec(
            &self,
            namespace: &str,
            pod: &str,
            options: &opsgate_core::ExecOptions,
        ) -> std::result::Result<crate::cluster::ExecChannel, ClusterError> {
            self.inner.pod_exec(namespace, pod, options).await
        }
    }

    #[tokio::test]
    async fn failed_restart_records_no_revision() -> anyhow::Result<()> {
        let client = Arc::new(PatchOutage {
            inner: MemCluster::new(),
            refuse_patches: AtomicBool::new(false),
        });
        let handle = ClusterHandle::new(
            ClusterId(1),
            "https://mem.internal:6443",
            "test",
            SecretString::from("token"),
            client.clone(),
        );
        let ctl: WorkloadController<Deployment> = WorkloadController::new(ObjectGateway::new(handle));
        let created = ctl.gateway().create(&web_draft("nginx:latest")).await?;
        let id = created.identity(ClusterId(1));

        client.refuse_patches.store(true, Ordering::SeqCst);
        assert!(matches!(ctl.restart(&id).await, Err(Error::Conflict(_))));
        assert!(ctl.list_revision_history(&id).await?.is_empty());

        // The retry after the conflict ends up with exactly one revision.
        client.refuse_patches.store(false, Ordering::SeqCst);
        ctl.restart(&id).await?;
        let history = ctl.list_revision_history(&id).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].revision, 1);
        Ok(())
    }

    #[tokio::test]
    async fn scale_to_zero_is_legal_but_negative_never_reaches_the_cluster() {
        let (ctl, cluster) = controller::<Deployment>();
        let created = ctl.gateway().create(&web_draft("nginx:latest")).await.unwrap();
        let id = created.identity(ClusterId(1));

        let scaled = ctl
            .scale(&id, created.resource_version().unwrap(), 0)
            .await
            .unwrap();
        assert_eq!(scaled.spec.replicas, Some(0));
        assert_eq!(ctl.gateway().get(&id).await.unwrap().spec.replicas, Some(0));

        let before = cluster.request_count();
        assert!(matches!(
            ctl.scale(&id, scaled.resource_version().unwrap(), -1).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(cluster.request_count(), before);
    }

    #[tokio::test]
    async fn scale_with_stale_version_conflicts() {
        let (ctl, _) = controller::<Deployment>();
        let created = ctl.gateway().create(&web_draft("nginx:latest")).await.unwrap();
        let id = created.identity(ClusterId(1));
        ctl.scale(&id, created.resource_version().unwrap(), 3).await.unwrap();
        assert!(matches!(
            ctl.scale(&id, created.resource_version().unwrap(), 4).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn rollback_restores_template_and_appends_history() {
        let (ctl, _) = controller::<Deployment>();
        let created = ctl.gateway().create(&web_draft("app:v1")).await.unwrap();
        let id = created.identity(ClusterId(1));

        // Revision 1 captures the v1 template.
        ctl.restart(&id).await.unwrap();

        let current = ctl.gateway().get(&id).await.unwrap();
        ctl.gateway()
            .update(
                &id,
                current.resource_version().unwrap(),
                &opsgate_core::PatchSet::default().image("app", "app:v2"),
            )
            .await
            .unwrap();
        // Revision 2 captures the v2 template.
        ctl.restart(&id).await.unwrap();

        let rolled = ctl.rollback(&id, 1).await.unwrap();
        assert_eq!(rolled.spec.template.spec.containers[0].image, "app:v1");

        let history = ctl.list_revision_history(&id).await.unwrap();
        let numbers: Vec<i64> = history.iter().map(|r| r.revision).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn pause_is_deployment_only() {
        let (ctl, _) = controller::<StatefulSet>();
        let mut draft = web_draft("nginx:latest");
        draft.types = opsgate_core::TypeMeta::of::<StatefulSet>();
        let created = ctl.gateway().create(&draft).await.unwrap();
        let id = created.identity(ClusterId(1));
        assert!(matches!(
            ctl.pause(&id).await,
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn pause_resume_toggle_the_flag() {
        let (ctl, _) = controller::<Deployment>();
        let created = ctl.gateway().create(&web_draft("nginx:latest")).await.unwrap();
        let id = created.identity(ClusterId(1));

        let paused = ctl.pause(&id).await.unwrap();
        assert_eq!(paused.spec.paused, Some(true));
        assert_eq!(rollout_status(&paused, Duration::from_secs(0)), RolloutStatus::Paused);

        let resumed = ctl.resume(&id).await.unwrap();
        assert_eq!(resumed.spec.paused, Some(false));
    }

    #[tokio::test]
    async fn list_pods_projects_matching_pods() {
        let (ctl, cluster) = controller::<Deployment>();
        let created = ctl.gateway().create(&web_draft("nginx:latest")).await.unwrap();
        let id = created.identity(ClusterId(1));

        cluster
            .create(
                &KindRef::of::<Pod>(),
                Some("default"),
                serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "web-1", "namespace": "default", "labels": {"app": "web"}},
                    "spec": {"containers": [{"name": "app", "image": "nginx:latest"}]},
                    "status": {"phase": "Running"}
                }),
            )
            .await
            .unwrap();
        cluster
            .create(
                &KindRef::of::<Pod>(),
                Some("default"),
                serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "other", "namespace": "default", "labels": {"app": "api"}},
                    "spec": {}
                }),
            )
            .await
            .unwrap();

        let pods = ctl.list_pods(&id).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "web-1");
        assert_eq!(pods[0].phase.as_deref(), Some("Running"));
        assert_eq!(pods[0].containers, vec![("app".to_string(), "nginx:latest".to_string())]);
    }

    #[test]
    fn rollout_status_derivation() {
        let mut obj = web_draft("nginx:latest");
        obj.status = Some(serde_json::json!({"readyReplicas": 2, "updatedReplicas": 2}));
        assert_eq!(rollout_status(&obj, Duration::from_secs(120)), RolloutStatus::Running);

        obj.status = Some(serde_json::json!({"readyReplicas": 1, "updatedReplicas": 2}));
        assert_eq!(rollout_status(&obj, Duration::from_secs(120)), RolloutStatus::Updating);

        let old = Utc::now() - chrono::Duration::seconds(600);
        obj.status = Some(serde_json::json!({
            "readyReplicas": 1,
            "updatedReplicas": 2,
            "conditions": [{"type": "Available", "status": "False", "reason": "CrashLoopBackOff", "lastTransitionTime": old.to_rfc3339()}]
        }));
        assert_eq!(rollout_status(&obj, Duration::from_secs(120)), RolloutStatus::Error);

        // Within the grace window it still counts as Updating.
        let recent = Utc::now() - chrono::Duration::seconds(10);
        obj.status = Some(serde_json::json!({
            "readyReplicas": 1,
            "updatedReplicas": 2,
            "conditions": [{"type": "Available", "status": "False", "reason": "CrashLoopBackOff", "lastTransitionTime": recent.to_rfc3339()}]
        }));
        assert_eq!(rollout_status(&obj, Duration::from_secs(120)), RolloutStatus::Updating);

        obj.spec.paused = Some(true);
        assert_eq!(rollout_status(&obj, Duration::from_secs(120)), RolloutStatus::Paused);
    }
}
