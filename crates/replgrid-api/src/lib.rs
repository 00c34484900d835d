//! replgrid-api — control surface for orchestration callers.
//!
//! Identity is established upstream: every request carries the caller in
//! the `x-user-id` header. Authorization goes through an [`AccessPolicy`].
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/start` | Ensure a workspace's resources exist and wait for readiness |
//! | POST | `/stop` | Tear a workspace's resources down |
//! | GET | `/workspaces` | Workspaces the caller owns or collaborates on |
//! | POST | `/workspaces` | Register a workspace and seed it from its language template |
//! | GET | `/workspaces/{id}` | Workspace record |
//! | GET | `/workspaces/{id}/snapshots` | Snapshots, newest first |
//! | POST | `/workspaces/{id}/snapshots` | Capture a snapshot |
//! | POST | `/workspaces/{id}/snapshots/{sid}/restore` | Restore a snapshot |
//! | POST | `/workspaces/{id}/fork` | Copy a workspace into a new id |

pub mod access;
pub mod handlers;
pub mod locks;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use replgrid_controller::ResourceController;
use replgrid_state::StateStore;
use replgrid_storage::SnapshotStore;

pub use access::{AccessPolicy, RegistryAccess};
pub use locks::WorkspaceLocks;

/// Header carrying the authenticated caller.
pub const USER_HEADER: &str = "x-user-id";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub controller: Arc<ResourceController>,
    pub snapshots: SnapshotStore,
    pub access: Arc<dyn AccessPolicy>,
    pub locks: WorkspaceLocks,
}

impl ApiState {
    /// State with the registry-backed access policy.
    pub fn new(
        store: StateStore,
        controller: Arc<ResourceController>,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            access: Arc::new(RegistryAccess::new(store.clone())),
            store,
            controller,
            snapshots,
            locks: WorkspaceLocks::default(),
        }
    }

    pub fn with_access(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = access;
        self
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/start", post(handlers::start))
        .route("/stop", post(handlers::stop))
        .route(
            "/workspaces",
            get(handlers::list_workspaces).post(handlers::create_workspace),
        )
        .route("/workspaces/{id}", get(handlers::get_workspace))
        .route(
            "/workspaces/{id}/snapshots",
            get(handlers::list_snapshots).post(handlers::create_snapshot),
        )
        .route(
            "/workspaces/{id}/snapshots/{sid}/restore",
            post(handlers::restore_snapshot),
        )
        .route("/workspaces/{id}/fork", post(handlers::fork_workspace))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
