//! The seam between the gateway and a cluster's API server.
//!
//! The engine never speaks HTTP itself; each cluster is reached through a
//! [`ClusterClient`] built by the registry's connector. Implementations wrap
//! whatever transport the deployment uses; [`MemCluster`] is the in-memory
//! one used by tests and local development.
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use opsgate_core::{ClusterKind, ClusterStatus, Error as GatewayError, ExecOptions, LogOptions};

mod mem;
pub use mem::MemCluster;

/// Kind addressing information a raw client needs to build API paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KindRef {
    /// apiVersion of the kind.
    pub api_version: &'static str,
    /// Kind name.
    pub kind: &'static str,
    /// Lowercase plural path segment.
    pub plural: &'static str,
}

impl KindRef {
    /// The reference for kind `K`.
    pub fn of<K: ClusterKind>() -> Self {
        Self {
            api_version: K::API_VERSION,
            kind: K::KIND,
            plural: K::PLURAL,
        }
    }

    /// The ControllerRevision-style kind used for rollout history storage.
    pub fn controller_revision() -> Self {
        Self {
            api_version: "apps/v1",
            kind: "ControllerRevision",
            plural: "controllerrevisions",
        }
    }
}

/// Failures reported by a cluster client.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server answered with an error payload.
    #[error("cluster api error: {0}")]
    Api(#[source] ClusterStatus),
    /// The API server could not be reached, or the connection dropped.
    #[error("cluster transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    /// Shorthand for a NotFound api error.
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ClusterError::Api(ClusterStatus::new(404, "NotFound", format!("{what} not found")))
    }

    /// Whether this is a transport-level failure (retriable for streams).
    pub fn is_transport(&self) -> bool {
        matches!(self, ClusterError::Transport(_))
    }
}

impl From<ClusterError> for GatewayError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Api(status) => GatewayError::from_cluster_status(status),
            ClusterError::Transport(msg) => GatewayError::UpstreamUnavailable(msg),
        }
    }
}

/// A lazily produced, possibly unbounded sequence of log lines.
pub type LogStream = BoxStream<'static, Result<String, ClusterError>>;

/// Events flowing container → client on an exec channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    /// Bytes from the remote process's stdout.
    Stdout(Vec<u8>),
    /// Bytes from the remote process's stderr.
    Stderr(Vec<u8>),
    /// The remote process exited with the given code.
    Exited(i32),
}

/// A bidirectional exec channel.
///
/// Dropping `input` signals the remote shell to terminate; the shell's
/// lifetime is bound to this channel.
pub struct ExecChannel {
    /// Client → container bytes.
    pub input: mpsc::Sender<Vec<u8>>,
    /// Container → client events.
    pub events: mpsc::Receiver<ExecEvent>,
}

/// Raw-JSON verbs against one cluster's API server.
///
/// Objects are plain JSON values in canonical wire shape (`apiVersion`,
/// `kind`, `metadata`, payload). Every write honors
/// `metadata.resourceVersion` as a compare-and-swap precondition; a
/// mismatch yields a `Conflict` status. Connections are established lazily.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object.
    async fn get(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ClusterError>;

    /// List objects, optionally restricted by namespace and label selector.
    ///
    /// Label filtering happens server-side; callers can rely on the result
    /// being the complete filtered set.
    async fn list(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError>;

    /// Create an object; fails with `AlreadyExists` if present.
    async fn create(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        body: Value,
    ) -> Result<Value, ClusterError>;

    /// Replace an object whole; `metadata.resourceVersion` must match.
    async fn replace(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        name: &str,
        body: Value,
    ) -> Result<Value, ClusterError>;

    /// Apply an RFC 7386 merge patch. If the patch carries
    /// `metadata.resourceVersion` it acts as a precondition.
    async fn merge_patch(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value, ClusterError>;

    /// Delete an object; fails with `NotFound` when absent.
    async fn delete(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        name: &str,
        force: bool,
    ) -> Result<(), ClusterError>;

    /// Open a log stream for a pod container.
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
    ) -> Result<LogStream, ClusterError>;

    /// Start a shell in a pod container.
    async fn pod_exec(
        &self,
        namespace: &str,
        pod: &str,
        options: &ExecOptions,
    ) -> Result<ExecChannel, ClusterError>;
}
