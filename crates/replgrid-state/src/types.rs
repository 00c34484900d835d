//! Persisted registry types.

use serde::{Deserialize, Serialize};

use replgrid_core::{Snapshot, WorkspaceId};

/// Metadata of a known workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    pub id: WorkspaceId,
    /// Seed template language (`base/{language}/`).
    pub language: String,
    pub owner_user_id: String,
    #[serde(default)]
    pub collaborators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from: Option<WorkspaceId>,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

impl WorkspaceRecord {
    pub fn new(id: WorkspaceId, language: &str, owner_user_id: &str) -> Self {
        Self {
            id,
            language: language.to_string(),
            owner_user_id: owner_user_id.to_string(),
            collaborators: Vec::new(),
            forked_from: None,
            created_at: replgrid_core::epoch_secs(),
        }
    }

    /// Owner or listed collaborator.
    pub fn is_member(&self, user_id: &str) -> bool {
        self.owner_user_id == user_id || self.collaborators.iter().any(|c| c == user_id)
    }
}

/// Build the composite key for the snapshots table.
pub fn snapshot_key(workspace_id: &WorkspaceId, snapshot_id: &str) -> String {
    format!("{workspace_id}:{snapshot_id}")
}

pub(crate) fn snapshot_table_key(snapshot: &Snapshot) -> String {
    snapshot_key(&snapshot.workspace_id, &snapshot.id)
}
