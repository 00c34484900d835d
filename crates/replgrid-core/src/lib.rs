pub mod config;
pub mod id;
pub mod layout;
pub mod types;

pub use config::{ConfigError, ReplgridConfig, parse_duration};
pub use id::{InvalidWorkspaceId, WorkspaceId};
pub use types::*;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
