//! StateStore — redb-backed registry persistence.
//!
//! Typed operations over workspace records and snapshot records. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use replgrid_core::{Snapshot, WorkspaceId};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// `map_err` closure wrapping the error text in a `StateError` variant.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Workspace and snapshot registry. Clones share one database.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open the registry file at `path`, creating it and its tables if needed.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "registry opened");
        Ok(store)
    }

    /// Registry that lives only as long as the process.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory registry opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Database))?;
        // open_table in a write transaction creates missing tables.
        txn.open_table(WORKSPACES).map_err(map_err!(Database))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!(Database))?;
        txn.commit().map_err(map_err!(Database))?;
        Ok(())
    }

    // ── Workspaces ─────────────────────────────────────────────────

    /// Insert a workspace record unless the id is already taken.
    ///
    /// Returns false (and writes nothing) when a record already exists.
    pub fn create_workspace(&self, record: &WorkspaceRecord) -> StateResult<bool> {
        let key = record.id.as_str();
        let value = serde_json::to_vec(record).map_err(map_err!(Codec))?;
        let txn = self.db.begin_write().map_err(map_err!(Database))?;
        let created;
        {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Database))?;
            let exists = table.get(key).map_err(map_err!(Access))?.is_some();
            if !exists {
                table
                    .insert(key, value.as_slice())
                    .map_err(map_err!(Access))?;
            }
            created = !exists;
        }
        txn.commit().map_err(map_err!(Database))?;
        debug!(%key, created, "workspace create");
        Ok(created)
    }

    /// Insert or update a workspace record.
    pub fn put_workspace(&self, record: &WorkspaceRecord) -> StateResult<()> {
        let key = record.id.as_str();
        let value = serde_json::to_vec(record).map_err(map_err!(Codec))?;
        let txn = self.db.begin_write().map_err(map_err!(Database))?;
        {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Database))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Access))?;
        }
        txn.commit().map_err(map_err!(Database))?;
        debug!(%key, "workspace stored");
        Ok(())
    }

    pub fn get_workspace(&self, id: &WorkspaceId) -> StateResult<Option<WorkspaceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Database))?;
        let table = txn.open_table(WORKSPACES).map_err(map_err!(Database))?;
        match table.get(id.as_str()).map_err(map_err!(Access))? {
            Some(guard) => {
                let record: WorkspaceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn list_workspaces(&self) -> StateResult<Vec<WorkspaceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Database))?;
        let table = txn.open_table(WORKSPACES).map_err(map_err!(Database))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Access))? {
            let (_, value) = entry.map_err(map_err!(Access))?;
            let record: WorkspaceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Codec))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete a workspace record and its snapshot records. Returns true if
    /// the workspace existed.
    pub fn delete_workspace(&self, id: &WorkspaceId) -> StateResult<bool> {
        let prefix = format!("{id}:");
        let txn = self.db.begin_write().map_err(map_err!(Database))?;
        let existed;
        let snapshots;
        {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Database))?;
            existed = table.remove(id.as_str()).map_err(map_err!(Access))?.is_some();

            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Database))?;
            let mut keys = Vec::new();
            for entry in table
                .range(prefix.as_str()..)
                .map_err(map_err!(Access))?
            {
                let (key, _) = entry.map_err(map_err!(Access))?;
                let key = key.value().to_string();
                if !key.starts_with(&prefix) {
                    break;
                }
                keys.push(key);
            }
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Access))?;
            }
            snapshots = keys.len();
        }
        txn.commit().map_err(map_err!(Database))?;
        debug!(workspace_id = %id, existed, snapshots, "workspace deleted");
        Ok(existed)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Store a snapshot record. Snapshots are immutable; ids are unique.
    pub fn put_snapshot(&self, snapshot: &Snapshot) -> StateResult<()> {
        let key = snapshot_table_key(snapshot);
        let value = serde_json::to_vec(snapshot).map_err(map_err!(Codec))?;
        let txn = self.db.begin_write().map_err(map_err!(Database))?;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Database))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Access))?;
        }
        txn.commit().map_err(map_err!(Database))?;
        debug!(%key, files = snapshot.files.len(), "snapshot stored");
        Ok(())
    }

    /// Get a snapshot belonging to the given workspace.
    pub fn get_snapshot(
        &self,
        workspace_id: &WorkspaceId,
        snapshot_id: &str,
    ) -> StateResult<Option<Snapshot>> {
        let key = snapshot_key(workspace_id, snapshot_id);
        let txn = self.db.begin_read().map_err(map_err!(Database))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Database))?;
        match table.get(key.as_str()).map_err(map_err!(Access))? {
            Some(guard) => {
                let snapshot: Snapshot =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// List a workspace's snapshots, newest first.
    pub fn list_snapshots_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> StateResult<Vec<Snapshot>> {
        let prefix = format!("{workspace_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Database))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Database))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Access))? {
            let (key, value) = entry.map_err(map_err!(Access))?;
            if key.value().starts_with(&prefix) {
                let snapshot: Snapshot =
                    serde_json::from_slice(value.value()).map_err(map_err!(Codec))?;
                results.push(snapshot);
            }
        }
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replgrid_core::SnapshotFile;

    fn id(s: &str) -> WorkspaceId {
        WorkspaceId::parse(s).unwrap()
    }

    fn test_snapshot(workspace: &str, snap_id: &str, created_at: u64) -> Snapshot {
        Snapshot {
            id: snap_id.to_string(),
            workspace_id: id(workspace),
            label: Some(format!("label {snap_id}")),
            files: vec![SnapshotFile {
                path: "a.py".to_string(),
                version_id: "v1".to_string(),
                size: 10,
            }],
            owner_user_id: "user-1".to_string(),
            created_at,
        }
    }

    // ── Workspace CRUD ─────────────────────────────────────────────

    #[test]
    fn workspace_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = WorkspaceRecord::new(id("abc-def-ghi"), "python", "user-1");

        assert!(store.create_workspace(&record).unwrap());
        let fetched = store.get_workspace(&id("abc-def-ghi")).unwrap();
        assert_eq!(fetched, Some(record));
    }

    #[test]
    fn workspace_create_refuses_duplicate() {
        let store = StateStore::open_in_memory().unwrap();
        let first = WorkspaceRecord::new(id("abc"), "python", "user-1");
        let second = WorkspaceRecord::new(id("abc"), "node", "user-2");

        assert!(store.create_workspace(&first).unwrap());
        assert!(!store.create_workspace(&second).unwrap());

        let kept = store.get_workspace(&id("abc")).unwrap().unwrap();
        assert_eq!(kept.language, "python");
        assert_eq!(kept.owner_user_id, "user-1");
    }

    #[test]
    fn workspace_put_overwrites_and_lists() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = WorkspaceRecord::new(id("abc"), "python", "user-1");
        store.put_workspace(&record).unwrap();
        record.collaborators.push("user-2".to_string());
        store.put_workspace(&record).unwrap();
        store
            .put_workspace(&WorkspaceRecord::new(id("xyz"), "node", "user-3"))
            .unwrap();

        let all = store.list_workspaces().unwrap();
        assert_eq!(all.len(), 2);
        let abc = store.get_workspace(&id("abc")).unwrap().unwrap();
        assert!(abc.is_member("user-2"));
        assert!(!abc.is_member("user-3"));
    }

    #[test]
    fn workspace_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_workspace(&WorkspaceRecord::new(id("abc"), "python", "user-1"))
            .unwrap();

        assert!(store.delete_workspace(&id("abc")).unwrap());
        assert!(!store.delete_workspace(&id("abc")).unwrap());
        assert!(store.get_workspace(&id("abc")).unwrap().is_none());
    }

    // ── Snapshot CRUD ──────────────────────────────────────────────

    #[test]
    fn snapshot_put_and_get_scoped_to_workspace() {
        let store = StateStore::open_in_memory().unwrap();
        let snap = test_snapshot("abc", "snap-1", 1000);
        store.put_snapshot(&snap).unwrap();

        assert_eq!(store.get_snapshot(&id("abc"), "snap-1").unwrap(), Some(snap));
        assert!(store.get_snapshot(&id("xyz"), "snap-1").unwrap().is_none());
    }

    #[test]
    fn snapshot_list_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_snapshot(&test_snapshot("abc", "s-old", 1000)).unwrap();
        store.put_snapshot(&test_snapshot("abc", "s-new", 3000)).unwrap();
        store.put_snapshot(&test_snapshot("abc", "s-mid", 2000)).unwrap();
        store.put_snapshot(&test_snapshot("abcd", "s-other", 4000)).unwrap();

        let listed = store.list_snapshots_for_workspace(&id("abc")).unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s-new", "s-mid", "s-old"]);
    }

    #[test]
    fn deleting_workspace_drops_its_snapshots() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_workspace(&WorkspaceRecord::new(id("abc"), "python", "user-1"))
            .unwrap();
        store.put_snapshot(&test_snapshot("abc", "s1", 1000)).unwrap();
        store.put_snapshot(&test_snapshot("abc", "s2", 1001)).unwrap();
        store.put_snapshot(&test_snapshot("abcd", "s3", 1002)).unwrap();
        store.put_snapshot(&test_snapshot("xyz", "s4", 1003)).unwrap();

        assert!(store.delete_workspace(&id("abc")).unwrap());
        assert!(store.list_snapshots_for_workspace(&id("abc")).unwrap().is_empty());
        assert_eq!(store.list_snapshots_for_workspace(&id("abcd")).unwrap().len(), 1);
        assert_eq!(store.list_snapshots_for_workspace(&id("xyz")).unwrap().len(), 1);
    }

    // ── On-disk ────────────────────────────────────────────────────

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .put_workspace(&WorkspaceRecord::new(id("abc"), "python", "user-1"))
                .unwrap();
            store.put_snapshot(&test_snapshot("abc", "s1", 1000)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_workspace(&id("abc")).unwrap().is_some());
        assert_eq!(store.list_snapshots_for_workspace(&id("abc")).unwrap().len(), 1);
    }

    #[test]
    fn empty_registry_lookups() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_workspaces().unwrap().is_empty());
        assert!(store.list_snapshots_for_workspace(&id("any")).unwrap().is_empty());
        assert!(!store.delete_workspace(&id("nope")).unwrap());
    }
}
