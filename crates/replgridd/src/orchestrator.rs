//! Orchestrator role — control surface over the cluster and storage.

use std::sync::Arc;

use tracing::info;

use replgrid_api::{ApiState, build_router};
use replgrid_controller::{
    KubeCluster, ManifestTemplate, Readiness, ResourceController, ResourceSetBuilder,
    ResourceSource,
};
use replgrid_core::ReplgridConfig;
use replgrid_state::StateStore;
use replgrid_storage::{S3Store, SnapshotStore};

pub async fn run(config: ReplgridConfig) -> anyhow::Result<()> {
    info!("replgrid orchestrator starting");

    // ── Registry ───────────────────────────────────────────────

    let data_dir = &config.orchestrator.data_dir;
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("replgrid.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "registry opened");

    // ── Resource controller ────────────────────────────────────

    let source = match &config.cluster.manifest {
        Some(path) => {
            info!(?path, placeholder = %config.cluster.placeholder, "using manifest template");
            let template = ManifestTemplate::from_file(path, &config.cluster.placeholder)?;
            ResourceSource::Template(template)
        }
        None => ResourceSource::Builder(ResourceSetBuilder::new(config.cluster.builder.clone())),
    };
    let cluster = KubeCluster::try_default(config.cluster.namespace.clone()).await?;
    info!(namespace = %cluster.namespace(), "cluster client ready");

    let readiness = Readiness::from_config(&config.cluster)?;
    let controller = ResourceController::new(Arc::new(cluster), source).with_readiness(readiness);
    info!(
        interval = ?readiness.interval,
        attempts = readiness.max_attempts,
        "resource controller initialized"
    );

    // ── Storage ────────────────────────────────────────────────

    let objects = S3Store::connect(&config.storage).await?;
    let snapshots = SnapshotStore::new(Arc::new(objects));

    // ── API server ─────────────────────────────────────────────

    let state = ApiState::new(store, Arc::new(controller), snapshots);
    crate::serve(&config.orchestrator.listen, build_router(state)).await?;

    info!("replgrid orchestrator stopped");
    Ok(())
}
