//! Cloud inventory reconciliation.
//!
//! A parallel concern to the cluster gateway: pull resource descriptions
//! from a cloud account, diff them against the stored inventory by
//! `instance_id`, and append an audit trail (sync history + change log)
//! atomically with the record updates. Inventory truth is authoritative;
//! service-tree binding is best-effort on top of it.
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use opsgate_core::Result;

mod store;
pub use store::MemoryInventoryStore;

/// Status given to records whose instance vanished from a full fetch.
///
/// Sync never deletes records; a vanished instance is visible as `missing`
/// until a user explicitly deletes it (or the provider reports it again).
pub const MISSING_STATUS: &str = "missing";

/// One key/value tag on a cloud instance; provider order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// A resource as reported by the cloud provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudInstance {
    /// Provider-assigned immutable id; the natural key for diffing.
    pub instance_id: String,
    /// Provider resource type, e.g. `ecs` or `rds`.
    pub resource_type: String,
    /// Provider-reported status.
    pub status: String,
    /// Tags in provider order.
    pub tags: Vec<Tag>,
}

/// A persisted inventory record.
///
/// `id` is the internal surrogate key referenced by tree-node bindings;
/// `instance_id` never changes once assigned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudResourceRecord {
    /// Internal surrogate key; assigned by the store, `0` before commit.
    pub id: i64,
    /// The cloud account the record belongs to.
    pub cloud_account_id: i64,
    /// Provider-assigned immutable id.
    pub instance_id: String,
    /// Provider resource type.
    pub resource_type: String,
    /// Last observed status, or [`MISSING_STATUS`].
    pub status: String,
    /// Service-tree nodes this record is bound to.
    pub bound_tree_node_ids: BTreeSet<i64>,
    /// Tags in provider order.
    pub tags: Vec<Tag>,
    /// When a sync last observed this instance.
    pub last_synced_at: DateTime<Utc>,
}

impl CloudResourceRecord {
    fn observed(cloud_account_id: i64, instance: &CloudInstance, at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            cloud_account_id,
            instance_id: instance.instance_id.clone(),
            resource_type: instance.resource_type.clone(),
            status: instance.status.clone(),
            bound_tree_node_ids: BTreeSet::new(),
            tags: instance.tags.clone(),
            last_synced_at: at,
        }
    }

    fn differs_from(&self, instance: &CloudInstance) -> bool {
        self.status != instance.status
            || self.resource_type != instance.resource_type
            || self.tags != instance.tags
    }
}

/// What a sync run concluded about one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// First time this instance was seen.
    Created,
    /// The instance exists and its observable fields changed.
    Updated,
    /// The instance exists and nothing changed.
    Unchanged,
    /// The record's instance vanished from a full fetch.
    Missing,
}

/// Append-only audit row; never mutated after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// The sync run that produced this entry.
    pub history_id: i64,
    /// The affected record.
    pub record_id: i64,
    /// The affected instance.
    pub instance_id: String,
    /// What happened.
    pub kind: ChangeKind,
    /// When the sync observed it.
    pub at: DateTime<Utc>,
}

/// Scope of a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Fetch the complete inventory; vanished records become missing.
    Full,
    /// Only the named instances; no missing detection.
    Incremental {
        /// The instances in scope.
        instance_ids: Vec<String>,
    },
}

/// Parameters of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Restrict to these provider resource types.
    pub resource_types: Option<Vec<String>>,
    /// Restrict to these provider regions.
    pub regions: Option<Vec<String>>,
    /// Full or incremental scope.
    pub mode: SyncMode,
    /// Bind newly discovered records to this service-tree node.
    pub auto_bind: Option<i64>,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            resource_types: None,
            regions: None,
            mode: SyncMode::Full,
            auto_bind: None,
        }
    }
}

impl SyncRequest {
    /// Scope the run to explicit instance ids.
    #[must_use]
    pub fn incremental(mut self, instance_ids: Vec<String>) -> Self {
        self.mode = SyncMode::Incremental { instance_ids };
        self
    }

    /// Auto-bind newly discovered records to a service-tree node.
    #[must_use]
    pub fn auto_bind(mut self, node_id: i64) -> Self {
        self.auto_bind = Some(node_id);
        self
    }
}

/// Summary of one sync run; append-only.
///
/// Counts cover fetched instances only, so
/// `new_count + update_count + unchanged_count` always equals the number of
/// instances the provider returned. `missing_count` is on top of that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    /// History id; assigned by the store, `0` before commit.
    pub id: i64,
    /// The synced account.
    pub cloud_account_id: i64,
    /// Scope of the run.
    pub mode: SyncMode,
    /// Instances seen for the first time.
    pub new_count: usize,
    /// Instances whose record changed.
    pub update_count: usize,
    /// Instances whose record did not change.
    pub unchanged_count: usize,
    /// Records that vanished from a full fetch.
    pub missing_count: usize,
    /// Non-fatal problems, e.g. binding failures.
    pub warnings: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run was committed.
    pub finished_at: DateTime<Utc>,
}

/// A change row before the store has assigned ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// The affected instance.
    pub instance_id: String,
    /// What happened.
    pub kind: ChangeKind,
}

/// One sync run's worth of writes, applied atomically by the store.
#[derive(Debug, Clone)]
pub struct SyncCommit {
    /// The history entry, id unassigned.
    pub history: SyncHistoryEntry,
    /// Upserted records; new ones carry `id == 0`.
    pub records: Vec<CloudResourceRecord>,
    /// One row per fetched instance, plus one per vanished record.
    pub changes: Vec<PendingChange>,
}

/// The committed state of a sync run.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The history entry with its assigned id.
    pub history: SyncHistoryEntry,
    /// The committed records with assigned ids.
    pub records: Vec<CloudResourceRecord>,
}

/// Lists the resources of a cloud account; one implementation per provider.
#[async_trait::async_trait]
pub trait CloudInventorySource: Send + Sync {
    /// Fetch instances, optionally restricted by type and region.
    async fn list_instances(
        &self,
        cloud_account_id: i64,
        resource_types: Option<&[String]>,
        regions: Option<&[String]>,
    ) -> Result<Vec<CloudInstance>>;
}

/// The service-tree binding capability; opaque to the reconciler.
#[async_trait::async_trait]
pub trait TreeBindingStore: Send + Sync {
    /// Attach a record to tree nodes.
    async fn bind(&self, record_id: i64, node_ids: &[i64]) -> Result<()>;
    /// Detach a record from tree nodes.
    async fn unbind(&self, record_id: i64, node_ids: &[i64]) -> Result<()>;
}

/// Durable storage for inventory records and their audit trail.
#[async_trait::async_trait]
pub trait InventoryStore: Send + Sync {
    /// All records of an account, sorted by instance id.
    async fn records(&self, cloud_account_id: i64) -> Result<Vec<CloudResourceRecord>>;

    /// One record by surrogate id.
    async fn record(&self, id: i64) -> Result<CloudResourceRecord>;

    /// Apply a sync run. Records, history and change log land together or
    /// not at all; the store assigns history and record ids and resolves
    /// change rows to record ids.
    async fn commit(&self, commit: SyncCommit) -> Result<SyncOutcome>;

    /// Append a warning to an already committed history entry.
    async fn add_warning(&self, history_id: i64, warning: String) -> Result<()>;

    /// Mirror a successful tree binding onto the record.
    async fn add_binding(&self, record_id: i64, node_id: i64) -> Result<()>;

    /// Remove a binding mirror from the record.
    async fn remove_binding(&self, record_id: i64, node_id: i64) -> Result<()>;

    /// Delete a record; the only way records leave the inventory.
    async fn delete_record(&self, id: i64) -> Result<()>;

    /// Sync history of an account, newest first.
    async fn history(&self, cloud_account_id: i64) -> Result<Vec<SyncHistoryEntry>>;

    /// The change log of one sync run.
    async fn changes(&self, history_id: i64) -> Result<Vec<ChangeLogEntry>>;
}

/// Diffs provider inventory against stored records and keeps the audit
/// trail; see the module docs for the authoritative-truth rules.
pub struct Reconciler {
    source: Arc<dyn CloudInventorySource>,
    bindings: Arc<dyn TreeBindingStore>,
    store: Arc<dyn InventoryStore>,
}

impl Reconciler {
    /// Build a reconciler over a provider source, binding store and
    /// inventory store.
    pub fn new(
        source: Arc<dyn CloudInventorySource>,
        bindings: Arc<dyn TreeBindingStore>,
        store: Arc<dyn InventoryStore>,
    ) -> Self {
        Self {
            source,
            bindings,
            store,
        }
    }

    /// The inventory store; read paths for UI screens go straight to it.
    pub fn store(&self) -> &dyn InventoryStore {
        self.store.as_ref()
    }

    /// Run one sync for an account.
    ///
    /// A source failure aborts the run with nothing written. Binding
    /// failures never roll back the inventory write; they surface as
    /// warnings on the returned history entry.
    pub async fn sync(
        &self,
        cloud_account_id: i64,
        request: &SyncRequest,
    ) -> Result<SyncHistoryEntry> {
        let started_at = Utc::now();
        let mut fetched = self
            .source
            .list_instances(
                cloud_account_id,
                request.resource_types.as_deref(),
                request.regions.as_deref(),
            )
            .await?;
        if let SyncMode::Incremental { instance_ids } = &request.mode {
            fetched.retain(|i| instance_ids.contains(&i.instance_id));
        }
        tracing::info!(
            account = cloud_account_id,
            fetched = fetched.len(),
            "syncing cloud inventory"
        );

        let existing: HashMap<String, CloudResourceRecord> = self
            .store
            .records(cloud_account_id)
            .await?
            .into_iter()
            .map(|r| (r.instance_id.clone(), r))
            .collect();

        let now = Utc::now();
        let mut records = Vec::with_capacity(fetched.len());
        let mut changes = Vec::with_capacity(fetched.len());
        let mut created_ids = Vec::new();
        let (mut new_count, mut update_count, mut unchanged_count) = (0, 0, 0);
        for instance in &fetched {
            let kind = match existing.get(&instance.instance_id) {
                None => {
                    new_count += 1;
                    created_ids.push(instance.instance_id.clone());
                    records.push(CloudResourceRecord::observed(cloud_account_id, instance, now));
                    ChangeKind::Created
                }
                Some(record) => {
                    let mut record = record.clone();
                    let kind = if record.differs_from(instance) {
                        update_count += 1;
                        record.status = instance.status.clone();
                        record.resource_type = instance.resource_type.clone();
                        record.tags = instance.tags.clone();
                        ChangeKind::Updated
                    } else {
                        unchanged_count += 1;
                        ChangeKind::Unchanged
                    };
                    record.last_synced_at = now;
                    records.push(record);
                    kind
                }
            };
            changes.push(PendingChange {
                instance_id: instance.instance_id.clone(),
                kind,
            });
        }

        let mut missing_count = 0;
        if request.mode == SyncMode::Full {
            let seen: BTreeSet<&str> = fetched.iter().map(|i| i.instance_id.as_str()).collect();
            for record in existing.values() {
                if seen.contains(record.instance_id.as_str()) || record.status == MISSING_STATUS {
                    continue;
                }
                missing_count += 1;
                let mut record = record.clone();
                record.status = MISSING_STATUS.to_string();
                changes.push(PendingChange {
                    instance_id: record.instance_id.clone(),
                    kind: ChangeKind::Missing,
                });
                records.push(record);
            }
        }

        let outcome = self
            .store
            .commit(SyncCommit {
                history: SyncHistoryEntry {
                    id: 0,
                    cloud_account_id,
                    mode: request.mode.clone(),
                    new_count,
                    update_count,
                    unchanged_count,
                    missing_count,
                    warnings: Vec::new(),
                    started_at,
                    finished_at: Utc::now(),
                },
                records,
                changes,
            })
            .await?;

        let mut history = outcome.history;
        if let Some(node_id) = request.auto_bind {
            for record in outcome
                .records
                .iter()
                .filter(|r| created_ids.contains(&r.instance_id))
            {
                if let Err(err) = self.bind_record(record.id, &[node_id]).await {
                    let warning = format!(
                        "auto-bind of {} to node {node_id} failed: {err}",
                        record.instance_id
                    );
                    tracing::warn!(account = cloud_account_id, "{warning}");
                    self.store.add_warning(history.id, warning.clone()).await?;
                    history.warnings.push(warning);
                }
            }
        }
        Ok(history)
    }

    /// Explicitly bind a record to tree nodes.
    pub async fn bind_record(&self, record_id: i64, node_ids: &[i64]) -> Result<()> {
        self.bindings.bind(record_id, node_ids).await?;
        for node_id in node_ids {
            self.store.add_binding(record_id, *node_id).await?;
        }
        Ok(())
    }

    /// Explicitly unbind a record from tree nodes.
    pub async fn unbind_record(&self, record_id: i64, node_ids: &[i64]) -> Result<()> {
        self.bindings.unbind(record_id, node_ids).await?;
        for node_id in node_ids {
            self.store.remove_binding(record_id, *node_id).await?;
        }
        Ok(())
    }

    /// Delete a record after releasing its bindings best-effort.
    pub async fn delete_record(&self, record_id: i64) -> Result<()> {
        let record = self.store.record(record_id).await?;
        let nodes: Vec<i64> = record.bound_tree_node_ids.iter().copied().collect();
        if !nodes.is_empty() {
            if let Err(err) = self.bindings.unbind(record_id, &nodes).await {
                tracing::warn!(record = record_id, error = %err, "unbind on delete failed");
            }
        }
        self.store.delete_record(record_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use opsgate_core::Error;

    struct StaticSource {
        instances: Mutex<Result<Vec<CloudInstance>>>,
    }

    impl StaticSource {
        fn returning(instances: Vec<CloudInstance>) -> Arc<Self> {
            Arc::new(Self {
                instances: Mutex::new(Ok(instances)),
            })
        }

        fn set(&self, instances: Vec<CloudInstance>) {
            *self.instances.lock() = Ok(instances);
        }

        fn fail(&self) {
            *self.instances.lock() = Err(Error::UpstreamUnavailable("provider api down".into()));
        }
    }

    #[async_trait::async_trait]
    impl CloudInventorySource for StaticSource {
        async fn list_instances(
            &self,
            _: i64,
            _: Option<&[String]>,
            _: Option<&[String]>,
        ) -> Result<Vec<CloudInstance>> {
            match &*self.instances.lock() {
                Ok(instances) => Ok(instances.clone()),
                Err(_) => Err(Error::UpstreamUnavailable("provider api down".into())),
            }
        }
    }

    struct FakeBindings {
        fail: AtomicBool,
        binds: AtomicUsize,
    }

    impl FakeBindings {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                binds: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl TreeBindingStore for FakeBindings {
        async fn bind(&self, _: i64, _: &[i64]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::UpstreamUnavailable("tree service down".into()));
            }
            self.binds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unbind(&self, _: i64, _: &[i64]) -> Result<()> {
            Ok(())
        }
    }

    fn instance(id: &str, status: &str) -> CloudInstance {
        CloudInstance {
            instance_id: id.to_string(),
            resource_type: "ecs".to_string(),
            status: status.to_string(),
            tags: vec![Tag {
                key: "env".into(),
                value: "prod".into(),
            }],
        }
    }

    fn reconciler(
        source: Arc<StaticSource>,
        bindings: Arc<FakeBindings>,
    ) -> (Reconciler, Arc<MemoryInventoryStore>) {
        let store = Arc::new(MemoryInventoryStore::new());
        (
            Reconciler::new(source, bindings, store.clone()),
            store,
        )
    }

    #[tokio::test]
    async fn full_sync_counts_are_consistent() {
        let source = StaticSource::returning(
            (0..3).map(|i| instance(&format!("i-{i}"), "running")).collect(),
        );
        let (reconciler, store) = reconciler(source.clone(), FakeBindings::new());

        // Seed three known records.
        reconciler.sync(42, &SyncRequest::default()).await.unwrap();

        // Provider now reports 10: the 3 known (one degraded) plus 7 new.
        let mut wave: Vec<CloudInstance> = (0..3)
            .map(|i| instance(&format!("i-{i}"), if i == 0 { "stopped" } else { "running" }))
            .collect();
        wave.extend((3..10).map(|i| instance(&format!("i-{i}"), "running")));
        source.set(wave);

        let history = reconciler.sync(42, &SyncRequest::default()).await.unwrap();
        assert_eq!(history.new_count, 7);
        assert_eq!(history.update_count, 1);
        assert_eq!(history.unchanged_count, 2);
        assert_eq!(history.update_count + history.unchanged_count, 3);
        assert_eq!(history.missing_count, 0);
        assert_eq!(
            history.new_count + history.update_count + history.unchanged_count,
            10
        );

        let changes = store.changes(history.id).await.unwrap();
        assert_eq!(changes.len(), 10);
        assert!(changes.iter().all(|c| c.history_id == history.id));
    }

    #[tokio::test]
    async fn vanished_instances_become_missing_but_stay_stored() {
        let source = StaticSource::returning(vec![
            instance("i-a", "running"),
            instance("i-b", "running"),
        ]);
        let (reconciler, store) = reconciler(source.clone(), FakeBindings::new());
        reconciler.sync(1, &SyncRequest::default()).await.unwrap();

        source.set(vec![instance("i-a", "running")]);
        let history = reconciler.sync(1, &SyncRequest::default()).await.unwrap();
        assert_eq!(history.missing_count, 1);
        assert_eq!(history.unchanged_count, 1);

        let records = store.records(1).await.unwrap();
        assert_eq!(records.len(), 2);
        let gone = records.iter().find(|r| r.instance_id == "i-b").unwrap();
        assert_eq!(gone.status, MISSING_STATUS);

        let changes = store.changes(history.id).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Missing));

        // Still missing next run: not re-logged.
        let next = reconciler.sync(1, &SyncRequest::default()).await.unwrap();
        assert_eq!(next.missing_count, 0);
    }

    #[tokio::test]
    async fn incremental_sync_is_scoped_and_never_marks_missing() {
        let source = StaticSource::returning(vec![
            instance("i-a", "running"),
            instance("i-b", "running"),
        ]);
        let (reconciler, store) = reconciler(source.clone(), FakeBindings::new());
        reconciler.sync(1, &SyncRequest::default()).await.unwrap();

        source.set(vec![instance("i-a", "stopped"), instance("i-b", "stopped")]);
        let history = reconciler
            .sync(1, &SyncRequest::default().incremental(vec!["i-a".into()]))
            .await
            .unwrap();
        assert_eq!(history.update_count, 1);
        assert_eq!(history.new_count + history.unchanged_count, 0);
        assert_eq!(history.missing_count, 0);

        let records = store.records(1).await.unwrap();
        let a = records.iter().find(|r| r.instance_id == "i-a").unwrap();
        let b = records.iter().find(|r| r.instance_id == "i-b").unwrap();
        assert_eq!(a.status, "stopped");
        assert_eq!(b.status, "running");
    }

    #[tokio::test]
    async fn source_failure_writes_nothing() {
        let source = StaticSource::returning(vec![instance("i-a", "running")]);
        let (reconciler, store) = reconciler(source.clone(), FakeBindings::new());
        reconciler.sync(1, &SyncRequest::default()).await.unwrap();

        source.fail();
        assert!(matches!(
            reconciler.sync(1, &SyncRequest::default()).await,
            Err(Error::UpstreamUnavailable(_))
        ));

        assert_eq!(store.history(1).await.unwrap().len(), 1);
        let records = store.records(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "running");
    }

    #[tokio::test]
    async fn auto_bind_attaches_new_records() {
        let source = StaticSource::returning(vec![instance("i-a", "running")]);
        let bindings = FakeBindings::new();
        let (reconciler, store) = reconciler(source, bindings.clone());

        let history = reconciler
            .sync(1, &SyncRequest::default().auto_bind(7))
            .await
            .unwrap();
        assert!(history.warnings.is_empty());
        assert_eq!(bindings.binds.load(Ordering::SeqCst), 1);

        let records = store.records(1).await.unwrap();
        assert!(records[0].bound_tree_node_ids.contains(&7));
    }

    #[tokio::test]
    async fn binding_failure_is_a_warning_not_a_rollback() {
        let source = StaticSource::returning(vec![instance("i-a", "running")]);
        let bindings = FakeBindings::new();
        bindings.fail.store(true, Ordering::SeqCst);
        let (reconciler, store) = reconciler(source, bindings);

        let history = reconciler
            .sync(1, &SyncRequest::default().auto_bind(7))
            .await
            .unwrap();
        assert_eq!(history.new_count, 1);
        assert_eq!(history.warnings.len(), 1);

        // Inventory truth survived the binding failure.
        let records = store.records(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].bound_tree_node_ids.is_empty());
        assert_eq!(store.history(1).await.unwrap()[0].warnings.len(), 1);
    }

    #[tokio::test]
    async fn delete_record_releases_bindings() {
        let source = StaticSource::returning(vec![instance("i-a", "running")]);
        let bindings = FakeBindings::new();
        let (reconciler, store) = reconciler(source, bindings);
        reconciler
            .sync(1, &SyncRequest::default().auto_bind(3))
            .await
            .unwrap();

        let records = store.records(1).await.unwrap();
        let record_id = records[0].id;
        reconciler.delete_record(record_id).await.unwrap();
        assert!(store.records(1).await.unwrap().is_empty());
        assert!(matches!(
            reconciler.delete_record(record_id).await,
            Err(Error::NotFound(_))
        ));
    }
}
