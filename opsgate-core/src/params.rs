//! Request parameter types for gateway, workload and stream operations.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{Error, Result},
    labels::Selector,
};

/// Query for one page of a filtered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Substring match on object names; applied after the label selector.
    pub search: Option<String>,
    /// Exact-match-all label filter, pushed down to the cluster.
    pub selector: Selector,
    /// Filter on the server-reported `status.phase`.
    pub status: Option<String>,
    /// 1-based page number.
    pub page: usize,
    /// Page size; must be non-zero.
    pub size: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search: None,
            selector: Selector::default(),
            status: None,
            page: 1,
            size: 20,
        }
    }
}

impl ListQuery {
    /// Restrict to names containing `needle`.
    #[must_use]
    pub fn search(mut self, needle: impl Into<String>) -> Self {
        self.search = Some(needle.into());
        self
    }

    /// Restrict by labels; every pair must match.
    #[must_use]
    pub fn labels(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    /// Restrict by `status.phase`.
    #[must_use]
    pub fn status(mut self, phase: impl Into<String>) -> Self {
        self.status = Some(phase.into());
        self
    }

    /// Select the page to return.
    #[must_use]
    pub fn page(mut self, page: usize, size: usize) -> Self {
        self.page = page;
        self.size = size;
        self
    }

    /// Check the paging parameters are usable.
    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(Error::Validation("page numbers are 1-based".into()));
        }
        if self.size == 0 {
            return Err(Error::Validation("page size must be non-zero".into()));
        }
        Ok(())
    }

    /// Slice bounds for the requested page over `total` filtered items.
    pub fn bounds(&self, total: usize) -> (usize, usize) {
        let start = (self.page - 1).saturating_mul(self.size).min(total);
        let end = start.saturating_add(self.size).min(total);
        (start, end)
    }
}

/// A partial structural update.
///
/// Only the fields present are touched; everything else is preserved
/// server-side. This is never a full-object replace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatchSet {
    /// Replace the object's labels with this map.
    pub labels: Option<BTreeMap<String, String>>,
    /// Replace the object's annotations with this map.
    pub annotations: Option<BTreeMap<String, String>>,
    /// Set the workload replica count.
    pub replicas: Option<i64>,
    /// Per-container image overrides (container name → image).
    pub images: BTreeMap<String, String>,
}

impl PatchSet {
    /// Patch only labels.
    pub fn labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            labels: Some(labels),
            ..Self::default()
        }
    }

    /// Patch only annotations.
    pub fn annotations(annotations: BTreeMap<String, String>) -> Self {
        Self {
            annotations: Some(annotations),
            ..Self::default()
        }
    }

    /// Patch only the replica count.
    pub fn replicas(replicas: i64) -> Self {
        Self {
            replicas: Some(replicas),
            ..Self::default()
        }
    }

    /// Add an image override for a named container.
    #[must_use]
    pub fn image(mut self, container: impl Into<String>, image: impl Into<String>) -> Self {
        self.images.insert(container.into(), image.into());
        self
    }

    /// Whether the patch would touch nothing.
    pub fn is_empty(&self) -> bool {
        self.labels.is_none()
            && self.annotations.is_none()
            && self.replicas.is_none()
            && self.images.is_empty()
    }

    /// The metadata/spec part of the merge patch. Image overrides and the
    /// removal of label/annotation keys absent from the submitted maps
    /// need the current object and are resolved by the gateway.
    pub fn to_merge_patch(&self) -> Result<Value> {
        if self.is_empty() {
            return Err(Error::Validation("patch would touch no fields".into()));
        }
        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                return Err(Error::Validation(format!(
                    "replicas must be >= 0, got {replicas}"
                )));
            }
        }
        let mut patch = json!({});
        if let Some(labels) = &self.labels {
            patch["metadata"]["labels"] = json!(labels);
        }
        if let Some(annotations) = &self.annotations {
            patch["metadata"]["annotations"] = json!(annotations);
        }
        if let Some(replicas) = self.replicas {
            patch["spec"]["replicas"] = json!(replicas);
        }
        Ok(patch)
    }
}

/// Options for a log tailing session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    /// The container to read; defaults to the pod's only container.
    pub container: Option<String>,
    /// Keep the stream open and follow new output.
    pub follow: bool,
    /// Number of lines from the end of the log to start with.
    pub tail_lines: Option<i64>,
    /// Relative start time in seconds before now.
    pub since_seconds: Option<i64>,
    /// Prefix each line with its timestamp.
    pub timestamps: bool,
}

impl LogOptions {
    /// Follow new output after the backlog.
    #[must_use]
    pub fn follow(mut self) -> Self {
        self.follow = true;
        self
    }

    /// Limit the initial backlog.
    #[must_use]
    pub fn tail_lines(mut self, lines: i64) -> Self {
        self.tail_lines = Some(lines);
        self
    }
}

/// Options for an interactive exec session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOptions {
    /// The container to exec into; defaults to the pod's only container.
    pub container: Option<String>,
    /// Shell binary to launch.
    pub shell: String,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            container: None,
            shell: "/bin/sh".to_string(),
        }
    }
}

/// Options controlling delete semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Skip graceful termination.
    pub force: bool,
    /// Treat a missing object as an error instead of already-satisfied.
    pub strict: bool,
}

impl DeleteOptions {
    /// Fail with `NotFound` when the object is already absent.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Skip graceful termination.
    #[must_use]
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_clamp_to_total() {
        let q = ListQuery::default().page(2, 10);
        assert_eq!(q.bounds(25), (10, 20));
        assert_eq!(q.bounds(12), (10, 12));
        assert_eq!(q.bounds(5), (5, 5));
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(matches!(
            PatchSet::default().to_merge_patch(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn negative_replicas_are_rejected() {
        assert!(PatchSet::replicas(-3).to_merge_patch().is_err());
    }

    #[test]
    fn merge_patch_only_touches_present_fields() {
        let patch = PatchSet::replicas(5).to_merge_patch().unwrap();
        assert_eq!(patch["spec"]["replicas"], 5);
        assert!(patch.get("metadata").is_none());
    }
}
