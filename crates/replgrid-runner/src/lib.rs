//! replgrid-runner — the process serving one workspace from inside its container.
//!
//! Each client connection gets a WebSocket session. Over it the client
//! browses and edits the workspace tree ([`WorkspaceSync`]) and drives at
//! most one shell ([`SessionManager`]). Edits land on local disk first and
//! are then uploaded to `code/{workspace_id}/` in durable storage.
//!
//! # Architecture
//!
//! ```text
//! build_router(RunnerState)
//!   └── GET /ws  (Host → WorkspaceId, then upgrade)
//!         ├── SessionManager   sessionId → pty
//!         └── WorkspaceSync    local fs + ObjectStore
//! ```

pub mod env;
pub mod error;
pub mod protocol;
pub mod server;
pub mod sync;
pub mod terminal;

pub use env::{DEFAULT_DENIED_ENV, process_env, sanitized_env};
pub use error::{SyncError, SyncResult, TerminalError, TerminalResult};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{
    ConnectionRejected, RunnerState, StaticRegistry, WorkspaceRegistry, build_router,
    resolve_connection,
};
pub use sync::{FileTree, PendingUpload, UploadOutcome, WorkspaceSync};
pub use terminal::{OpenOutcome, SessionId, SessionManager, ShellConfig, TerminalEvent};
