//! Error taxonomy shared by every opsgate component.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error payload as reported by a cluster's API server.
///
/// Gateways never re-expose this raw; it is classified into [`Error`] via
/// [`Error::from_cluster_status`] with the original message kept as context.
#[derive(Error, Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[error("{message} ({reason})")]
pub struct ClusterStatus {
    /// Machine readable reason, e.g. `NotFound`, `AlreadyExists`, `Conflict`.
    #[serde(default)]
    pub reason: String,
    /// Human readable message from the cluster.
    #[serde(default)]
    pub message: String,
    /// The HTTP status code the cluster responded with.
    pub code: u16,
}

impl ClusterStatus {
    /// Construct a status from its parts.
    pub fn new(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
            code,
        }
    }
}

/// All failure modes surfaced by opsgate operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The addressed object (or cluster, or revision target owner) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create attempted for an object that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The supplied `resource_version` no longer matches the live object.
    ///
    /// Callers must re-fetch and retry; opsgate never merges concurrent
    /// writes silently.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed identity, spec field, quantity or patch.
    #[error("validation error: {0}")]
    Validation(String),

    /// The submitted YAML document could not be parsed.
    #[error("yaml parse error: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// The submitted YAML names a different kind/name/namespace than the target.
    #[error("identity mismatch: expected {expected}, document has {found}")]
    IdentityMismatch {
        /// The identity the operation targets.
        expected: String,
        /// What the document actually declared.
        found: String,
    },

    /// The verb is not defined for this kind (e.g. pausing a StatefulSet).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Rollback target revision does not exist in the history.
    #[error("revision {0} not found")]
    RevisionNotFound(i64),

    /// The cluster rejected the credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The cluster denied the operation (RBAC).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The cluster API could not be reached or failed internally.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A log/exec session ended, possibly after exhausting its reconnect budget.
    #[error("stream terminated: {0}")]
    StreamTerminated(String),
}

impl Error {
    /// Classify a cluster-reported error into the opsgate taxonomy.
    ///
    /// The original cluster message is preserved as context. Reasons take
    /// precedence over status codes since API servers are more precise there.
    pub fn from_cluster_status(status: ClusterStatus) -> Self {
        let msg = if status.message.is_empty() {
            status.reason.clone()
        } else {
            status.message.clone()
        };
        match (status.code, status.reason.as_str()) {
            (_, "NotFound") | (404, _) => Error::NotFound(msg),
            (_, "AlreadyExists") => Error::AlreadyExists(msg),
            (_, "Conflict") | (409, _) => Error::Conflict(msg),
            (_, "Unauthorized") | (401, _) => Error::Unauthorized(msg),
            (_, "Forbidden") | (403, _) => Error::Forbidden(msg),
            (_, "Invalid") | (_, "BadRequest") | (400, _) | (422, _) => Error::Validation(msg),
            _ => Error::UpstreamUnavailable(msg),
        }
    }

    /// Whether re-fetching the object and retrying can resolve this error.
    pub fn is_retriable_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Convenience alias for opsgate fallible operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
