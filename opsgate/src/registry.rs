//! Resolution of cluster ids to live clients.
use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use tokio::{sync::OnceCell, time::Instant};

use opsgate_core::{ClusterId, ClusterKind, Error, Result, WorkloadKind};

use crate::{cluster::ClusterClient, gateway::ObjectGateway, workload::WorkloadController};

/// Connection material for one cluster, as stored by the console.
#[derive(Clone)]
pub struct ClusterConfig {
    /// The cluster's id.
    pub id: ClusterId,
    /// API server endpoint.
    pub api_endpoint: String,
    /// Environment tag (e.g. `prod`, `staging`).
    pub environment: String,
    /// Access credentials; never logged.
    pub credentials: SecretString,
}

/// Looks up cluster connection material by id.
#[async_trait]
pub trait ClusterConfigSource: Send + Sync {
    /// Resolve `id`, failing with [`Error::NotFound`] for unknown clusters.
    async fn lookup(&self, id: ClusterId) -> Result<ClusterConfig>;
}

/// Builds a client for a cluster. Implementations connect lazily; simply
/// constructing a client must not require the API server to be reachable.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Build a client from connection material.
    async fn connect(&self, config: &ClusterConfig) -> Result<Arc<dyn ClusterClient>>;
}

/// A resolved cluster: connection material plus a live client.
///
/// Immutable once resolved; cached by the registry with a TTL and dropped
/// on [`ClusterRegistry::invalidate`] (callers do that on auth failures).
#[derive(Clone)]
pub struct ClusterHandle {
    /// The cluster's id.
    pub id: ClusterId,
    /// API server endpoint.
    pub api_endpoint: String,
    /// Environment tag.
    pub environment: String,
    /// Access credentials.
    pub credentials: SecretString,
    /// The client all operations go through.
    pub client: Arc<dyn ClusterClient>,
    resolved_at: Instant,
}

impl ClusterHandle {
    /// Wrap an already-built client; used by custom wiring and tests.
    pub fn new(
        id: ClusterId,
        api_endpoint: impl Into<String>,
        environment: impl Into<String>,
        credentials: SecretString,
        client: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            id,
            api_endpoint: api_endpoint.into(),
            environment: environment.into(),
            credentials,
            client,
            resolved_at: Instant::now(),
        }
    }

    /// How long ago this handle was resolved.
    pub fn age(&self) -> Duration {
        self.resolved_at.elapsed()
    }
}

/// Caches resolved [`ClusterHandle`]s with single-flight construction.
///
/// Concurrent resolutions of the same id never race-construct duplicate
/// clients: the first caller initializes a per-id cell, everyone else
/// awaits it.
pub struct ClusterRegistry {
    source: Arc<dyn ClusterConfigSource>,
    connector: Arc<dyn ClusterConnector>,
    ttl: Duration,
    slots: Mutex<HashMap<ClusterId, Arc<OnceCell<ClusterHandle>>>>,
}

impl ClusterRegistry {
    /// Default handle TTL.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

    /// Build a registry over a config source and connector.
    pub fn new(source: Arc<dyn ClusterConfigSource>, connector: Arc<dyn ClusterConnector>) -> Self {
        Self::with_ttl(source, connector, Self::DEFAULT_TTL)
    }

    /// Build a registry with an explicit handle TTL.
    pub fn with_ttl(
        source: Arc<dyn ClusterConfigSource>,
        connector: Arc<dyn ClusterConnector>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            connector,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a cluster id to a live handle.
    pub async fn resolve(&self, id: ClusterId) -> Result<ClusterHandle> {
        loop {
            let cell = { self.slots.lock().entry(id).or_default().clone() };
            let handle = cell
                .get_or_try_init(|| async {
                    tracing::debug!(cluster = %id, "resolving cluster handle");
                    let config = self.source.lookup(id).await?;
                    let client = self.connector.connect(&config).await?;
                    Ok::<_, Error>(ClusterHandle {
                        id: config.id,
                        api_endpoint: config.api_endpoint,
                        environment: config.environment,
                        credentials: config.credentials,
                        client,
                        resolved_at: Instant::now(),
                    })
                })
                .await?;
            if handle.resolved_at.elapsed() <= self.ttl {
                return Ok(handle.clone());
            }
            // Expired: retire this cell (unless someone already did) and retry.
            tracing::debug!(cluster = %id, "cluster handle expired");
            let mut slots = self.slots.lock();
            if let Some(current) = slots.get(&id) {
                if Arc::ptr_eq(current, &cell) {
                    slots.remove(&id);
                }
            }
        }
    }

    /// Drop the cached handle for `id`, forcing re-resolution on next use.
    pub fn invalidate(&self, id: ClusterId) {
        if self.slots.lock().remove(&id).is_some() {
            tracing::info!(cluster = %id, "cluster handle invalidated");
        }
    }

    /// An [`ObjectGateway`] for kind `K` on cluster `id`.
    pub async fn gateway<K: ClusterKind>(&self, id: ClusterId) -> Result<ObjectGateway<K>> {
        Ok(ObjectGateway::new(self.resolve(id).await?))
    }

    /// A [`WorkloadController`] for workload kind `K` on cluster `id`.
    pub async fn workloads<K: WorkloadKind>(&self, id: ClusterId) -> Result<WorkloadController<K>> {
        Ok(WorkloadController::new(ObjectGateway::new(self.resolve(id).await?)))
    }
}
