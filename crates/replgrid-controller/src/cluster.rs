//! The cluster API seam.

use async_trait::async_trait;

use crate::error::ClusterResult;
use crate::resource::{ManifestResource, ResourceKind};

/// Replica counts of a Deployment as last observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub desired: i32,
    pub available: i32,
}

impl ReplicaStatus {
    pub fn is_ready(&self) -> bool {
        self.available >= self.desired
    }
}

/// Namespaced object operations the controller needs.
///
/// `get` and `delete` return `ClusterError::NotFound` for absent objects;
/// `create` returns `ClusterError::AlreadyExists` when the name is taken.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get(&self, kind: ResourceKind, name: &str) -> ClusterResult<()>;

    async fn create(&self, resource: &ManifestResource) -> ClusterResult<()>;

    async fn delete(&self, kind: ResourceKind, name: &str) -> ClusterResult<()>;

    async fn replica_status(&self, deployment: &str) -> ClusterResult<ReplicaStatus>;
}
