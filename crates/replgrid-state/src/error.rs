//! Registry errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open registry: {0}")]
    Open(String),

    /// Transaction begin/commit or table open failed.
    #[error("registry database error: {0}")]
    Database(String),

    #[error("registry access error: {0}")]
    Access(String),

    /// A stored record could not be encoded or decoded.
    #[error("corrupt registry record: {0}")]
    Codec(String),
}
