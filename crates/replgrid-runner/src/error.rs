use std::path::PathBuf;

use thiserror::Error;

use replgrid_storage::StorageError;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("failed to spawn shell: {0}")]
    Spawn(String),

    #[error("no terminal for session {0}")]
    NoSession(String),

    #[error("terminal i/o failed: {0}")]
    Io(String),
}

pub type TerminalResult<T> = Result<T, TerminalError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid workspace path {0:?}")]
    InvalidPath(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("upload task failed: {0}")]
    Upload(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
