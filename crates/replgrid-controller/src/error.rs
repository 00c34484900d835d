//! Controller error types.

use thiserror::Error;

use crate::resource::ResourceKind;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest template {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("manifest placeholder must not be empty")]
    EmptyPlaceholder,

    #[error("invalid manifest document: {0}")]
    Parse(String),

    #[error("manifest has no Deployment")]
    MissingDeployment,

    #[error("manifest has more than one {0}")]
    Duplicate(ResourceKind),

    #[error("{kind} is named {found:?}, expected the workspace id {expected:?}")]
    NameMismatch {
        kind: ResourceKind,
        found: String,
        expected: String,
    },
}

pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors from the cluster API seam.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("cluster api error: {0}")]
    Api(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("reconcile task failed: {0}")]
    Task(String),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
