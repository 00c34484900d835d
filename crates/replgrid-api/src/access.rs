//! Authorization seam.

use tracing::warn;

use replgrid_core::WorkspaceId;
use replgrid_state::StateStore;

/// `canAccess(workspaceId, userId)` of the external permission system.
pub trait AccessPolicy: Send + Sync {
    fn can_access(&self, workspace_id: &WorkspaceId, user_id: &str) -> bool;
}

/// Owner and collaborators recorded in the registry may access a workspace.
#[derive(Clone)]
pub struct RegistryAccess {
    store: StateStore,
}

impl RegistryAccess {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl AccessPolicy for RegistryAccess {
    fn can_access(&self, workspace_id: &WorkspaceId, user_id: &str) -> bool {
        match self.store.get_workspace(workspace_id) {
            Ok(Some(record)) => record.is_member(user_id),
            Ok(None) => false,
            Err(e) => {
                warn!(%workspace_id, error = %e, "access check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replgrid_state::WorkspaceRecord;

    #[test]
    fn members_only() {
        let store = StateStore::open_in_memory().unwrap();
        let id = WorkspaceId::parse("abc").unwrap();
        let mut record = WorkspaceRecord::new(id.clone(), "python", "owner");
        record.collaborators.push("friend".to_string());
        store.put_workspace(&record).unwrap();

        let access = RegistryAccess::new(store);
        assert!(access.can_access(&id, "owner"));
        assert!(access.can_access(&id, "friend"));
        assert!(!access.can_access(&id, "stranger"));
        assert!(!access.can_access(&WorkspaceId::parse("missing").unwrap(), "owner"));
    }
}
