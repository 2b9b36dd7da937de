//! Cluster API access.
//!
//! Migration and upgrade logic talk to the API server only through
//! [`ClusterApi`], so the same code runs against [`KubeCluster`] in a job and
//! against an in-memory fake in tests.

pub mod client;
pub mod cluster;
#[cfg(test)]
pub mod fake;
pub mod job;
pub mod update;

pub use cluster::{ClusterApi, ClusterObject, EventKind, KubeCluster};
pub use update::update_with_retry;
