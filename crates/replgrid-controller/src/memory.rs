//! In-memory `ClusterApi` for tests and single-node runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cluster::{ClusterApi, ReplicaStatus};
use crate::error::{ClusterError, ClusterResult};
use crate::resource::{ManifestResource, ResourceKind};

#[derive(Default)]
pub struct InMemoryCluster {
    objects: Mutex<HashMap<(ResourceKind, String), ManifestResource>>,
    failing: Mutex<HashSet<ResourceKind>>,
    creates: AtomicU32,
    status_polls: AtomicU32,
    /// Number of status polls before a Deployment reports available. `None` = never.
    ready_after: Option<u32>,
    /// When set, `get` never sees existing objects, as two racing readers would.
    stale_reads: bool,
}

impl InMemoryCluster {
    /// A cluster whose Deployments are available on the first poll.
    pub fn new() -> Self {
        Self {
            ready_after: Some(0),
            ..Default::default()
        }
    }

    pub fn with_ready_after(polls: u32) -> Self {
        Self {
            ready_after: Some(polls),
            ..Default::default()
        }
    }

    pub fn never_ready() -> Self {
        Self {
            ready_after: None,
            ..Default::default()
        }
    }

    pub fn with_stale_reads(mut self) -> Self {
        self.stale_reads = true;
        self
    }

    /// Make every call touching `kind` fail with an API error.
    pub fn fail_kind(&self, kind: ResourceKind) {
        self.failing.lock().insert(kind);
    }

    pub fn heal_kind(&self, kind: ResourceKind) {
        self.failing.lock().remove(&kind);
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.objects.lock().contains_key(&(kind, name.to_string()))
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Successful creates since construction.
    pub fn create_count(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    fn check_failing(&self, kind: ResourceKind) -> ClusterResult<()> {
        if self.failing.lock().contains(&kind) {
            return Err(ClusterError::Api(format!("injected failure for {kind}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn get(&self, kind: ResourceKind, name: &str) -> ClusterResult<()> {
        self.check_failing(kind)?;
        let found = !self.stale_reads && self.contains(kind, name);
        if found {
            Ok(())
        } else {
            Err(ClusterError::NotFound {
                kind,
                name: name.to_string(),
            })
        }
    }

    async fn create(&self, resource: &ManifestResource) -> ClusterResult<()> {
        let kind = resource.kind();
        self.check_failing(kind)?;
        let name = resource.name().unwrap_or_default().to_string();

        let mut objects = self.objects.lock();
        let key = (kind, name.clone());
        if objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists { kind, name });
        }
        objects.insert(key, resource.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> ClusterResult<()> {
        self.check_failing(kind)?;
        match self.objects.lock().remove(&(kind, name.to_string())) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }

    async fn replica_status(&self, deployment: &str) -> ClusterResult<ReplicaStatus> {
        self.check_failing(ResourceKind::Deployment)?;
        if !self.contains(ResourceKind::Deployment, deployment) {
            return Err(ClusterError::NotFound {
                kind: ResourceKind::Deployment,
                name: deployment.to_string(),
            });
        }
        let polls = self.status_polls.fetch_add(1, Ordering::SeqCst);
        let available = match self.ready_after {
            Some(after) if polls >= after => 1,
            _ => 0,
        };
        Ok(ReplicaStatus {
            desired: 1,
            available,
        })
    }
}
