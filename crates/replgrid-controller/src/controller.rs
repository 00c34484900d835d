//! Resource controller — idempotent ensure, readiness polling, teardown.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use replgrid_core::WorkspaceId;
use replgrid_core::config::{ClusterConfig, ConfigError};

use crate::cluster::ClusterApi;
use crate::error::{ClusterError, ControllerError, ControllerResult};
use crate::manifest::ResourceSource;
use crate::resource::{ManifestResource, ResourceKind};

/// Bounded polling budget for Deployment readiness.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }
}

impl Readiness {
    pub fn from_config(config: &ClusterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            interval: config.readiness_interval()?,
            max_attempts: config.readiness_attempts,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnsureReport {
    pub ready: bool,
    /// Objects this call created. Zero when everything already existed.
    pub created: u32,
}

/// Per-kind deletion outcome. `true` also covers "was already absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub deployment: bool,
    pub service: bool,
    pub ingress: bool,
}

pub struct ResourceController {
    cluster: Arc<dyn ClusterApi>,
    source: ResourceSource,
    readiness: Readiness,
}

impl ResourceController {
    pub fn new(cluster: Arc<dyn ClusterApi>, source: ResourceSource) -> Self {
        Self {
            cluster,
            source,
            readiness: Readiness::default(),
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    /// Make sure the resource set exists, then wait for the Deployment.
    ///
    /// Reconciliation runs on its own task: dropping this future stops the
    /// wait but never an in-flight create.
    pub async fn ensure_running(&self, id: &WorkspaceId) -> ControllerResult<EnsureReport> {
        let set = self.source.render(id)?;
        debug!(workspace_id = %id, kinds = ?set.kinds(), "resource set rendered");
        let cluster = self.cluster.clone();
        let resources = set.into_resources();

        let created = tokio::spawn(async move { reconcile(cluster.as_ref(), &resources).await })
            .await
            .map_err(|e| ControllerError::Task(e.to_string()))?;

        let ready = self.wait_ready(id.as_str()).await;
        if ready {
            info!(workspace_id = %id, created, "workspace ready");
        } else {
            warn!(
                workspace_id = %id,
                attempts = self.readiness.max_attempts,
                "workspace did not become ready"
            );
        }
        Ok(EnsureReport { ready, created })
    }

    /// Poll replica counts until available >= desired or the budget runs out.
    pub async fn wait_ready(&self, deployment: &str) -> bool {
        for attempt in 1..=self.readiness.max_attempts {
            match self.cluster.replica_status(deployment).await {
                Ok(status) if status.is_ready() => return true,
                Ok(status) => {
                    debug!(
                        deployment,
                        attempt,
                        desired = status.desired,
                        available = status.available,
                        "not ready"
                    );
                }
                Err(e) => debug!(deployment, attempt, error = %e, "status poll failed"),
            }
            if attempt < self.readiness.max_attempts {
                tokio::time::sleep(self.readiness.interval).await;
            }
        }
        false
    }

    /// Delete all three kinds by the workspace's name.
    pub async fn teardown(&self, id: &WorkspaceId) -> TeardownReport {
        let name = id.as_str();
        let mut results = [false; 3];
        for (slot, kind) in results.iter_mut().zip(ResourceKind::ALL) {
            *slot = match self.cluster.delete(kind, name).await {
                Ok(()) => {
                    debug!(%kind, name, "deleted");
                    true
                }
                Err(ClusterError::NotFound { .. }) => true,
                Err(e) => {
                    warn!(%kind, name, error = %e, "delete failed");
                    false
                }
            };
        }
        let [deployment, service, ingress] = results;
        info!(workspace_id = %id, deployment, service, ingress, "teardown finished");
        TeardownReport {
            deployment,
            service,
            ingress,
        }
    }
}

/// Read-then-create each resource. Returns the number of objects created.
async fn reconcile(cluster: &dyn ClusterApi, resources: &[ManifestResource]) -> u32 {
    let mut created = 0;
    for resource in resources {
        let kind = resource.kind();
        let name = resource.name().unwrap_or_default();
        match cluster.get(kind, name).await {
            Ok(()) => debug!(%kind, name, "already present"),
            Err(ClusterError::NotFound { .. }) => match cluster.create(resource).await {
                Ok(()) => {
                    info!(%kind, name, "created");
                    created += 1;
                }
                Err(ClusterError::AlreadyExists { .. }) => {
                    debug!(%kind, name, "created concurrently by another caller");
                }
                Err(e) => warn!(%kind, name, error = %e, "create failed, skipping"),
            },
            Err(e) => warn!(%kind, name, error = %e, "read failed, skipping"),
        }
    }
    created
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ResourceSetBuilder;
    use crate::memory::InMemoryCluster;
    use replgrid_core::config::BuilderConfig;

    fn id(s: &str) -> WorkspaceId {
        WorkspaceId::parse(s).unwrap()
    }

    fn controller(cluster: Arc<InMemoryCluster>) -> ResourceController {
        let source = ResourceSource::Builder(ResourceSetBuilder::new(BuilderConfig::default()));
        ResourceController::new(cluster, source)
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_creates_three_then_zero() {
        let cluster = Arc::new(InMemoryCluster::new());
        let ctl = controller(cluster.clone());
        let ws = id("abc-def-ghi");

        let first = ctl.ensure_running(&ws).await.unwrap();
        assert_eq!(first, EnsureReport { ready: true, created: 3 });

        let second = ctl.ensure_running(&ws).await.unwrap();
        assert_eq!(second, EnsureReport { ready: true, created: 0 });
        assert_eq!(cluster.object_count(), 3);
        assert_eq!(cluster.create_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_ensure_converges_on_one_set() {
        let cluster = Arc::new(InMemoryCluster::new().with_stale_reads());
        let ctl = controller(cluster.clone());
        let ws = id("abc-def-ghi");

        let (a, b) = tokio::join!(ctl.ensure_running(&ws), ctl.ensure_running(&ws));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.ready && b.ready);
        assert_eq!(a.created + b.created, 3);
        assert_eq!(cluster.object_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_replicas() {
        let cluster = Arc::new(InMemoryCluster::with_ready_after(5));
        let ctl = controller(cluster);
        let report = ctl.ensure_running(&id("abc")).await.unwrap();
        assert!(report.ready);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_budget_is_bounded() {
        let cluster = Arc::new(InMemoryCluster::never_ready());
        let ctl = controller(cluster).with_readiness(Readiness {
            interval: Duration::from_millis(10),
            max_attempts: 3,
        });
        let started = tokio::time::Instant::now();
        let report = ctl.ensure_running(&id("abc")).await.unwrap();
        assert!(!report.ready);
        assert_eq!(report.created, 3);
        // Two sleeps between three attempts.
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_kind_does_not_block_others() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.fail_kind(ResourceKind::Service);
        let ctl = controller(cluster.clone());
        let ws = id("abc");

        let report = ctl.ensure_running(&ws).await.unwrap();
        assert_eq!(report, EnsureReport { ready: true, created: 2 });
        assert!(!cluster.contains(ResourceKind::Service, "abc"));

        cluster.heal_kind(ResourceKind::Service);
        let retry = ctl.ensure_running(&ws).await.unwrap();
        assert_eq!(retry.created, 1);
        assert_eq!(cluster.object_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_without_resources_succeeds() {
        let ctl = controller(Arc::new(InMemoryCluster::new()));
        let report = ctl.teardown(&id("nothing-here")).await;
        assert_eq!(
            report,
            TeardownReport { deployment: true, service: true, ingress: true }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_removes_set_and_reports_failures() {
        let cluster = Arc::new(InMemoryCluster::new());
        let ctl = controller(cluster.clone());
        let ws = id("abc");
        ctl.ensure_running(&ws).await.unwrap();

        cluster.fail_kind(ResourceKind::Ingress);
        let report = ctl.teardown(&ws).await;
        assert_eq!(
            report,
            TeardownReport { deployment: true, service: true, ingress: false }
        );

        cluster.heal_kind(ResourceKind::Ingress);
        let again = ctl.teardown(&ws).await;
        assert!(again.deployment && again.service && again.ingress);
        assert_eq!(cluster.object_count(), 0);
    }

    #[test]
    fn readiness_from_config() {
        let mut config = ClusterConfig::default();
        config.readiness_interval = "250ms".to_string();
        config.readiness_attempts = 4;
        let readiness = Readiness::from_config(&config).unwrap();
        assert_eq!(readiness.interval, Duration::from_millis(250));
        assert_eq!(readiness.max_attempts, 4);
    }
}
