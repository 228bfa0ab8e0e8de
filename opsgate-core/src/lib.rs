//! Shared types, params and client-less codecs for the opsgate gateway.
//!
//! This crate holds everything that does not require a cluster connection:
//! the error taxonomy, object identities and kind metadata, wire object
//! shapes, request parameters, label selection, quantity validation and the
//! deterministic YAML/Secret codec. The engine lives in the `opsgate` crate.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod error;
pub mod identity;
pub mod labels;
pub mod object;
pub mod params;
pub mod quantity;
pub mod resource;
pub mod specs;

pub use error::{ClusterStatus, Error, Result};
pub use identity::{ClusterId, ResourceIdentity};
pub use labels::Selector;
pub use object::{ManagedObject, ObjectMeta, Page, PodSummary, TypeMeta};
pub use params::{DeleteOptions, ExecOptions, ListQuery, LogOptions, PatchSet};
pub use resource::{ClusterKind, Scope, WorkloadKind};
