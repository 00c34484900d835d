use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("version {version} of {key} not found")]
    VersionNotFound { key: String, version: String },

    #[error("storage request failed: {0}")]
    Request(String),

    #[error("invalid storage configuration: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
