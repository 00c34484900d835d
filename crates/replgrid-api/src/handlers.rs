//! Control-surface handlers.
//!
//! Workspace routes answer with the `ApiResponse` envelope. `start` and
//! `stop` answer with the bare `{ready}` / `{results}` bodies their callers
//! poll on.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use replgrid_core::WorkspaceId;
use replgrid_state::WorkspaceRecord;
use replgrid_storage::BatchReport;

use crate::{ApiState, USER_HEADER};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn internal(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "request failed");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

// ── Request guards ─────────────────────────────────────────────

fn caller(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| error_response("missing x-user-id", StatusCode::UNAUTHORIZED))
}

fn parse_id(raw: &str) -> Result<WorkspaceId, Response> {
    WorkspaceId::parse(raw).map_err(|e| error_response(&e.to_string(), StatusCode::BAD_REQUEST))
}

/// Resolve caller and workspace, and check the caller may use it.
fn authorize(
    state: &ApiState,
    headers: &HeaderMap,
    raw_id: &str,
) -> Result<(String, WorkspaceRecord), Response> {
    let user = caller(headers)?;
    let id = parse_id(raw_id)?;
    let record = match state.store.get_workspace(&id) {
        Ok(Some(record)) => record,
        Ok(None) => return Err(error_response("workspace not found", StatusCode::NOT_FOUND)),
        Err(e) => return Err(internal(e)),
    };
    if !state.access.can_access(&id, &user) {
        warn!(workspace_id = %id, user = %user, "access denied");
        return Err(error_response("access denied", StatusCode::FORBIDDEN));
    }
    Ok((user, record))
}

macro_rules! guard {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(resp) => return resp,
        }
    };
}

// ── Lifecycle ──────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRequest {
    pub workspace_id: String,
}

/// POST /start
pub async fn start(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<LifecycleRequest>,
) -> Response {
    let (_, record) = guard!(authorize(&state, &headers, &req.workspace_id));
    let _lock = state.locks.lock(&record.id).await;

    match state.controller.ensure_running(&record.id).await {
        Ok(report) => {
            let status = if report.ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(json!({ "ready": report.ready }))).into_response()
        }
        Err(e) => internal(e),
    }
}

/// POST /stop
pub async fn stop(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<LifecycleRequest>,
) -> Response {
    let (_, record) = guard!(authorize(&state, &headers, &req.workspace_id));
    let _lock = state.locks.lock(&record.id).await;

    let results = state.controller.teardown(&record.id).await;
    Json(json!({ "results": results })).into_response()
}

// ── Workspaces ─────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub workspace_id: String,
    pub language: String,
}

#[derive(Serialize)]
struct WorkspaceCreated {
    workspace: WorkspaceRecord,
    files: BatchReport,
}

fn valid_language(language: &str) -> bool {
    !language.is_empty()
        && language
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// POST /workspaces
pub async fn create_workspace(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Response {
    let user = guard!(caller(&headers));
    let id = guard!(parse_id(&req.workspace_id));
    if !valid_language(&req.language) {
        return error_response("invalid language", StatusCode::BAD_REQUEST);
    }

    let record = WorkspaceRecord::new(id.clone(), &req.language, &user);
    match state.store.create_workspace(&record) {
        Ok(true) => {}
        Ok(false) => return error_response("workspace already exists", StatusCode::CONFLICT),
        Err(e) => return internal(e),
    }

    match state.snapshots.seed_from_template(&req.language, &id).await {
        Ok(files) => {
            info!(
                workspace_id = %id,
                language = %req.language,
                files = files.succeeded,
                "workspace created"
            );
            let body = WorkspaceCreated { workspace: record, files };
            (StatusCode::CREATED, ApiResponse::ok(body)).into_response()
        }
        Err(e) => {
            // Roll back the registration.
            if let Err(cleanup) = state.store.delete_workspace(&id) {
                warn!(
                    workspace_id = %id,
                    error = %cleanup,
                    "could not unregister unseeded workspace"
                );
            }
            error!(workspace_id = %id, error = %e, "seeding failed");
            error_response(&e.to_string(), StatusCode::BAD_GATEWAY)
        }
    }
}

/// GET /workspaces
///
/// Workspaces the caller owns or collaborates on, oldest first.
pub async fn list_workspaces(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let user = guard!(caller(&headers));
    match state.store.list_workspaces() {
        Ok(all) => {
            let mut mine: Vec<WorkspaceRecord> =
                all.into_iter().filter(|w| w.is_member(&user)).collect();
            mine.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            ApiResponse::ok(mine).into_response()
        }
        Err(e) => internal(e),
    }
}

/// GET /workspaces/{id}
pub async fn get_workspace(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let (_, record) = guard!(authorize(&state, &headers, &id));
    ApiResponse::ok(record).into_response()
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ForkRequest {
    #[serde(default)]
    pub new_workspace_id: Option<String>,
}

/// POST /workspaces/{id}/fork
pub async fn fork_workspace(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ForkRequest>,
) -> Response {
    let (user, source) = guard!(authorize(&state, &headers, &id));
    let target = match req.new_workspace_id.as_deref() {
        Some(raw) => guard!(parse_id(raw)),
        None => WorkspaceId::fork_of(&source.id),
    };

    let mut record = WorkspaceRecord::new(target.clone(), &source.language, &user);
    record.forked_from = Some(source.id.clone());
    match state.store.create_workspace(&record) {
        Ok(true) => {}
        Ok(false) => return error_response("target workspace already exists", StatusCode::CONFLICT),
        Err(e) => return internal(e),
    }

    match state.snapshots.clone_workspace(&source.id, &target).await {
        Ok(files) => {
            info!(
                source = %source.id,
                target = %target,
                files = files.succeeded,
                "workspace forked"
            );
            let body = WorkspaceCreated { workspace: record, files };
            (StatusCode::CREATED, ApiResponse::ok(body)).into_response()
        }
        Err(e) => {
            if let Err(cleanup) = state.store.delete_workspace(&target) {
                warn!(workspace_id = %target, error = %cleanup, "could not unregister failed fork");
            }
            error!(source = %source.id, error = %e, "fork failed");
            error_response(&e.to_string(), StatusCode::BAD_GATEWAY)
        }
    }
}

// ── Snapshots ──────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct CreateSnapshotRequest {
    #[serde(default)]
    pub label: Option<String>,
}

/// GET /workspaces/{id}/snapshots
pub async fn list_snapshots(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let (_, record) = guard!(authorize(&state, &headers, &id));
    match state.store.list_snapshots_for_workspace(&record.id) {
        Ok(snapshots) => ApiResponse::ok(snapshots).into_response(),
        Err(e) => internal(e),
    }
}

/// POST /workspaces/{id}/snapshots
pub async fn create_snapshot(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CreateSnapshotRequest>,
) -> Response {
    let (user, record) = guard!(authorize(&state, &headers, &id));
    let snapshot = match state.snapshots.capture(&record.id, req.label.as_deref(), &user).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(workspace_id = %record.id, error = %e, "capture failed");
            return error_response(&e.to_string(), StatusCode::BAD_GATEWAY);
        }
    };
    match state.store.put_snapshot(&snapshot) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(snapshot)).into_response(),
        Err(e) => internal(e),
    }
}

/// POST /workspaces/{id}/snapshots/{sid}/restore
pub async fn restore_snapshot(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((id, sid)): Path<(String, String)>,
) -> Response {
    let (_, record) = guard!(authorize(&state, &headers, &id));
    let snapshot = match state.store.get_snapshot(&record.id, &sid) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return error_response("snapshot not found", StatusCode::NOT_FOUND),
        Err(e) => return internal(e),
    };
    let report = state.snapshots.restore(&record.id, &snapshot).await;
    if report.succeeded == 0 && !report.failed.is_empty() {
        error!(
            workspace_id = %record.id,
            snapshot_id = %snapshot.id,
            failed = report.failed.len(),
            "restore wrote nothing"
        );
        let body = ApiResponse {
            success: false,
            data: Some(report),
            error: Some("no file could be restored".to_string()),
        };
        return (StatusCode::BAD_GATEWAY, Json(body)).into_response();
    }
    ApiResponse::ok(report).into_response()
}
