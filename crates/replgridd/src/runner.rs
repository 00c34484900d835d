//! Runner role — the in-container session server.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use replgrid_core::{ReplgridConfig, WorkspaceId};
use replgrid_runner::{
    RunnerState, SessionManager, ShellConfig, StaticRegistry, WorkspaceSync, build_router,
    process_env, sanitized_env,
};
use replgrid_storage::S3Store;

pub async fn run(config: ReplgridConfig) -> anyhow::Result<()> {
    let runner = &config.runner;
    let raw_id = runner
        .workspace_id
        .as_deref()
        .context("runner needs a workspace id (--workspace-id or WORKSPACE_ID)")?;
    let workspace_id = WorkspaceId::parse(raw_id)?;
    info!(%workspace_id, "replgrid runner starting");

    let root = runner.workspace_root.clone();
    std::fs::create_dir_all(&root)?;

    let objects = S3Store::connect(&config.storage).await?;
    let sync = WorkspaceSync::new(root.clone(), workspace_id.clone(), Arc::new(objects));
    if runner.hydrate_on_start {
        if let Err(e) = sync.hydrate().await {
            warn!(%workspace_id, error = %e, "hydrate failed, serving local files only");
        }
    }

    let env = sanitized_env(process_env(), &runner.denied_env, &root);
    let sessions = Arc::new(SessionManager::new(ShellConfig {
        program: runner.shell.clone(),
        cwd: root,
        env,
        cols: runner.cols,
        rows: runner.rows,
    }));

    let state = RunnerState {
        sessions: sessions.clone(),
        sync: Arc::new(sync),
        registry: Arc::new(StaticRegistry::new([workspace_id])),
    };
    crate::serve(&runner.listen, build_router(state)).await?;

    sessions.close_all();
    info!("replgrid runner stopped");
    Ok(())
}
