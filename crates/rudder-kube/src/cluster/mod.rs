//! Cluster access
//!
//! The orchestrator only talks to the cluster through [`ClusterClient`].
//! [`KubeCluster`] drives a real API server; [`MemoryCluster`] keeps objects
//! in memory and journals every call for tests and dry runs.

mod live;
mod memory;

pub use self::live::{KubeCluster, KubeLookup};
pub use self::memory::{ClusterOp, MemoryCluster};

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::manifest::{self, Resource, ResourceKey};

/// Objects touched by an apply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResult {
    pub created: Vec<ResourceKey>,
    pub updated: Vec<ResourceKey>,
    /// Removed because the desired state no longer has them
    pub deleted: Vec<ResourceKey>,
}

/// Objects touched by a delete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub deleted: Vec<ResourceKey>,
    /// Left in place, with the reason
    pub skipped: Vec<(ResourceKey, String)>,
}

/// Operations the release lifecycle needs from a cluster
///
/// Slices are processed in the order given; callers sort them.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Parse a manifest stream into resources, without hooks
    async fn build(&self, manifest: &str) -> Result<Vec<Resource>> {
        Ok(manifest::split_stream(manifest, &Default::default())?.resources)
    }

    /// Create resources, taking over any that already exist
    async fn create(&self, resources: &[Resource]) -> Result<ApplyResult>;

    /// Move the cluster from `current` to `target`
    ///
    /// Every target resource is applied first. Resources only in `current`
    /// are deleted afterwards, so a failed apply deletes nothing. With
    /// `force`, a resource the server refuses to patch is replaced.
    async fn update(&self, current: &[Resource], target: &[Resource], force: bool) -> Result<ApplyResult>;

    /// Delete resources; absent ones and those marked keep are skipped
    async fn delete(&self, resources: &[Resource]) -> Result<DeleteResult>;

    /// Wait until workloads report ready
    async fn wait(&self, resources: &[Resource], timeout: Duration) -> Result<()>;

    /// Wait until Jobs and Pods run to completion; fails if they fail
    async fn wait_for_completion(&self, resources: &[Resource], timeout: Duration) -> Result<()>;

    /// Create a namespace unless it exists
    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Fail with `ClusterUnreachable` when the API server does not answer
    async fn ping(&self) -> Result<()>;
}

/// Resources of `current` whose key is not in `target`
pub fn orphans<'a>(current: &'a [Resource], target: &[Resource]) -> Vec<&'a Resource> {
    let keep: std::collections::HashSet<ResourceKey> = target.iter().map(Resource::key).collect();
    current.iter().filter(|r| !keep.contains(&r.key())).collect()
}
