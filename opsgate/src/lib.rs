//! Cluster-facing gateway engine for an ops console.
//!
//! Mediates UI-driven reads and mutations against one or more Kubernetes
//! clusters, with optimistic concurrency on every write, resilient log/exec
//! streaming, and a parallel cloud-inventory reconciler.
//!
//! - [`registry`] resolves cluster ids to live clients, cached single-flight.
//! - [`gateway`] is the generic per-kind CRUD + YAML engine.
//! - [`workload`] adds lifecycle verbs (scale/restart/rollback/pause) and
//!   rollout history on top of the gateway.
//! - [`stream`] owns long-lived log and exec sessions with reconnects.
//! - [`inventory`] syncs cloud-provider resources into stored records with
//!   an append-only audit trail.
//!
//! Client-less types (errors, identities, kinds, codecs) live in
//! [`opsgate_core`] and are re-exported here for convenience.
#![forbid(unsafe_code)]

pub mod cluster;
pub mod gateway;
pub mod inventory;
pub mod registry;
pub mod stream;
pub mod workload;

pub use opsgate_core as core;
pub use opsgate_core::{ClusterId, Error, ResourceIdentity, Result};

pub use crate::{
    cluster::{ClusterClient, MemCluster},
    gateway::ObjectGateway,
    inventory::Reconciler,
    registry::{ClusterHandle, ClusterRegistry},
    stream::{ExecSession, LogSession},
    workload::WorkloadController,
};
