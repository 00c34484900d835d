//! Shared types used across replgrid crates.

use serde::{Deserialize, Serialize};

use crate::WorkspaceId;

/// Maximum length of a snapshot label, in characters.
pub const MAX_LABEL_LEN: usize = 100;

/// Kind of an entry in a workspace file tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// One entry of a shallow directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Path relative to the workspace root, `/`-separated, no leading slash.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub kind: NodeKind,
    /// File bytes, only populated when content was explicitly requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileNode {
    pub fn new(path: impl Into<String>, kind: NodeKind) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            path,
            name,
            kind,
            content: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// A reference to one historical object version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    /// Path relative to the workspace prefix.
    pub path: String,
    pub version_id: String,
    pub size: u64,
}

/// Immutable point-in-time manifest of a workspace's storage versions.
///
/// Holds no file bytes, only version references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub label: Option<String>,
    pub files: Vec<SnapshotFile>,
    pub owner_user_id: String,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

impl Snapshot {
    /// Look up the captured version of a path.
    pub fn file(&self, path: &str) -> Option<&SnapshotFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Trim a user-supplied label, drop it if empty, and bound its length.
pub fn normalize_label(label: Option<&str>) -> Option<String> {
    let trimmed = label?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_LABEL_LEN).collect())
}
