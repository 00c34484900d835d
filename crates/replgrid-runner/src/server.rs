//! WebSocket session server.

use std::collections::HashSet;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use replgrid_core::{InvalidWorkspaceId, WorkspaceId};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::sync::{FileTree, WorkspaceSync};
use crate::error::TerminalError;
use crate::terminal::{Generation, SessionManager, TerminalEvent};

// ── Connection resolution ──────────────────────────────────────

/// The set of workspaces this server may serve.
pub trait WorkspaceRegistry: Send + Sync {
    fn contains(&self, id: &WorkspaceId) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct StaticRegistry(HashSet<WorkspaceId>);

impl StaticRegistry {
    pub fn new(ids: impl IntoIterator<Item = WorkspaceId>) -> Self {
        Self(ids.into_iter().collect())
    }
}

impl WorkspaceRegistry for StaticRegistry {
    fn contains(&self, id: &WorkspaceId) -> bool {
        self.0.contains(id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionRejected {
    #[error("missing host header")]
    MissingHost,

    #[error("host does not name a workspace: {0}")]
    InvalidId(#[from] InvalidWorkspaceId),

    #[error("unknown workspace {0}")]
    Unknown(WorkspaceId),
}

impl ConnectionRejected {
    pub fn status(&self) -> StatusCode {
        match self {
            ConnectionRejected::MissingHost | ConnectionRejected::InvalidId(_) => {
                StatusCode::BAD_REQUEST
            }
            ConnectionRejected::Unknown(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// Derive the workspace from the first label of the host and check it is known.
pub fn resolve_connection(
    host: Option<&str>,
    registry: &dyn WorkspaceRegistry,
) -> Result<WorkspaceId, ConnectionRejected> {
    let host = host
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(ConnectionRejected::MissingHost)?;
    let label = host.split('.').next().unwrap_or_default();
    let label = label.split(':').next().unwrap_or_default();
    let id = WorkspaceId::parse(label)?;
    if !registry.contains(&id) {
        return Err(ConnectionRejected::Unknown(id));
    }
    Ok(id)
}

// ── Router ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RunnerState {
    pub sessions: Arc<SessionManager>,
    pub sync: Arc<WorkspaceSync>,
    pub registry: Arc<dyn WorkspaceRegistry>,
}

pub fn build_router(state: RunnerState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<RunnerState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let workspace_id = match resolve_connection(host, state.registry.as_ref()) {
        Ok(id) => id,
        Err(e) => {
            warn!(?host, error = %e, "rejecting connection");
            return (e.status(), e.to_string()).into_response();
        }
    };
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state, workspace_id)),
        Err(rejection) => rejection.into_response(),
    }
}

// ── Session loop ───────────────────────────────────────────────

async fn handle_socket(mut socket: WebSocket, state: RunnerState, workspace_id: WorkspaceId) {
    let session_id = Uuid::new_v4().to_string();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut tree = FileTree::default();
    info!(%session_id, %workspace_id, "session connected");

    let root_content = match state.sync.list_children("").await {
        Ok(nodes) => {
            tree.merge(nodes.clone());
            nodes
        }
        Err(e) => {
            warn!(%session_id, error = %e, "root listing failed");
            Vec::new()
        }
    };
    let loaded = ServerMessage::Loaded { root_content };
    if socket.send(Message::Text(loaded.to_json().into())).await.is_err() {
        return;
    }

    let mut session = Session {
        id: session_id.clone(),
        workspace_id,
        state: state.clone(),
        events: events_tx,
        tree,
    };

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let replies = match incoming {
                    Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => session.terminal_input(data.to_vec()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => {
                        debug!(%session_id, error = %e, "socket error");
                        break;
                    }
                };
                if send_all(&mut socket, replies).await.is_err() {
                    break;
                }
            }
            Some(event) = events_rx.recv() => {
                let Some(frame) = session.terminal_event(event).await else {
                    continue;
                };
                if socket.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }

    release(&state.sessions, &session_id, None).await;
    info!(%session_id, "session disconnected");
}

async fn send_all(socket: &mut WebSocket, replies: Vec<ServerMessage>) -> Result<(), axum::Error> {
    for reply in replies {
        socket.send(Message::Text(reply.to_json().into())).await?;
    }
    Ok(())
}

/// Close a session's pty off the async runtime; reaping may block briefly.
///
/// With a generation, only that pty is closed. Returns whether one was.
async fn release(
    sessions: &Arc<SessionManager>,
    session_id: &str,
    generation: Option<Generation>,
) -> bool {
    let sessions = sessions.clone();
    let id = session_id.to_string();
    tokio::task::spawn_blocking(move || match generation {
        Some(generation) => sessions.close_generation(&id, generation),
        None => sessions.close(&id),
    })
    .await
    .unwrap_or(false)
}

struct Session {
    id: String,
    workspace_id: WorkspaceId,
    state: RunnerState,
    events: mpsc::UnboundedSender<TerminalEvent>,
    tree: FileTree,
}

impl Session {
    async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => return vec![ServerMessage::error(None, format!("bad message: {e}"))],
        };
        let sync = &self.state.sync;

        match message {
            ClientMessage::RequestTerminal => {
                match self.state.sessions.open(&self.id, &self.workspace_id, self.events.clone()) {
                    Ok(outcome) => {
                        debug!(session_id = %self.id, ?outcome, "terminal requested");
                        Vec::new()
                    }
                    Err(e) => vec![ServerMessage::error(None, e.to_string())],
                }
            }
            ClientMessage::TerminalData { data } => self.terminal_input(data.into_bytes()).await,
            ClientMessage::ResizeTerminal { cols, rows } => {
                if let Err(e) = self.state.sessions.resize(&self.id, cols, rows) {
                    debug!(session_id = %self.id, error = %e, "resize ignored");
                }
                Vec::new()
            }
            ClientMessage::FetchDir { ack, path } => match sync.list_children(&path).await {
                Ok(nodes) => {
                    self.tree.merge(nodes.clone());
                    vec![ServerMessage::Ack { ack, result: json!(nodes) }]
                }
                Err(e) => vec![ServerMessage::error(Some(ack), e.to_string())],
            },
            ClientMessage::FetchContent { ack, path } => match sync.read_content(&path).await {
                Ok(bytes) => vec![ServerMessage::Ack {
                    ack,
                    result: json!(String::from_utf8_lossy(&bytes)),
                }],
                Err(e) => vec![ServerMessage::error(Some(ack), e.to_string())],
            },
            ClientMessage::UpdateContent { path, content } => {
                match sync.write_content(&path, Bytes::from(content)).await {
                    // The upload finishes on its own task and logs its outcome.
                    Ok(_pending) => Vec::new(),
                    Err(e) => vec![ServerMessage::error(None, e.to_string())],
                }
            }
            ClientMessage::RefreshFiles { ack } => match sync.refresh_root(&mut self.tree).await {
                Ok(nodes) => vec![ServerMessage::Ack { ack, result: json!(nodes) }],
                Err(e) => vec![ServerMessage::error(Some(ack), e.to_string())],
            },
        }
    }

    async fn terminal_input(&self, data: Vec<u8>) -> Vec<ServerMessage> {
        let sessions = self.state.sessions.clone();
        let id = self.id.clone();
        let result = tokio::task::spawn_blocking(move || sessions.write(&id, &data)).await;
        match result {
            Ok(Ok(())) => Vec::new(),
            Ok(Err(TerminalError::NoSession(_))) => {
                vec![ServerMessage::error(None, "no terminal; send requestTerminal first")]
            }
            // The failed pty is already closed; its late exit event is ignored.
            Ok(Err(e)) => vec![
                ServerMessage::error(None, e.to_string()),
                ServerMessage::TerminalExit,
            ],
            Err(e) => vec![ServerMessage::error(None, format!("terminal write task failed: {e}"))],
        }
    }

    /// Frame to send for a pty event, if any.
    async fn terminal_event(&self, event: TerminalEvent) -> Option<Message> {
        match event {
            TerminalEvent::Output(bytes) => Some(Message::Binary(bytes)),
            TerminalEvent::Exited { generation } => {
                if release(&self.state.sessions, &self.id, Some(generation)).await {
                    Some(Message::Text(ServerMessage::TerminalExit.to_json().into()))
                } else {
                    debug!(session_id = %self.id, generation, "exit of a closed pty ignored");
                    None
                }
            }
        }
    }
}
