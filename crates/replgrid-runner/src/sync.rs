//! Workspace file sync.
//!
//! The local filesystem is the working copy; durable storage under
//! `code/{workspace_id}/` is the record. Reads are served locally, writes
//! go to disk first and are then uploaded whole.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use replgrid_core::layout::{code_prefix, is_folder_marker, object_key};
use replgrid_core::{FileNode, NodeKind, WorkspaceId};
use replgrid_storage::object::list_all_objects;
use replgrid_storage::{ObjectStore, StorageResult};

use crate::error::{SyncError, SyncResult};

/// Accumulated shallow listings, de-duplicated by path.
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    nodes: BTreeMap<String, FileNode>,
}

impl FileTree {
    /// Add nodes not seen before. Returns how many were new.
    pub fn merge(&mut self, nodes: impl IntoIterator<Item = FileNode>) -> usize {
        let before = self.nodes.len();
        for node in nodes {
            self.nodes.entry(node.path.clone()).or_insert(node);
        }
        self.nodes.len() - before
    }

    pub fn nodes(&self) -> Vec<FileNode> {
        self.nodes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stored, with the version id the backend assigned.
    Stored(Option<String>),
    /// A later write to the same path was made first; this one was dropped.
    Superseded,
}

/// Upload started by `write_content`. Dropping it detaches the upload.
pub struct PendingUpload(JoinHandle<StorageResult<UploadOutcome>>);

impl PendingUpload {
    pub async fn wait(self) -> SyncResult<UploadOutcome> {
        self.0
            .await
            .map_err(|e| SyncError::Upload(e.to_string()))?
            .map_err(SyncError::from)
    }
}

/// Per-path write ordering.
///
/// `write` covers the local write and the sequence number it gets, so
/// sequence order is local write order. `upload` lets one put run at a
/// time; an upload whose sequence is no longer the latest is skipped.
#[derive(Default)]
struct PathSlot {
    write: AsyncMutex<()>,
    upload: AsyncMutex<()>,
    latest: AtomicU64,
}

pub struct WorkspaceSync {
    root: PathBuf,
    workspace_id: WorkspaceId,
    store: Arc<dyn ObjectStore>,
    slots: Mutex<HashMap<String, Arc<PathSlot>>>,
}

impl WorkspaceSync {
    pub fn new(
        root: impl Into<PathBuf>,
        workspace_id: WorkspaceId,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            root: root.into(),
            workspace_id,
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Immediate children of a directory, directories first.
    pub async fn list_children(&self, path: &str) -> SyncResult<Vec<FileNode>> {
        let relative = normalize_path(path)?;
        let dir = self.root.join(&relative);
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|source| SyncError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut nodes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| SyncError::Io {
            path: dir.clone(),
            source,
        })? {
            let file_type = entry.file_type().await.map_err(|source| SyncError::Io {
                path: entry.path(),
                source,
            })?;
            let kind = if file_type.is_dir() {
                NodeKind::Directory
            } else {
                NodeKind::File
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = if relative.is_empty() {
                name
            } else {
                format!("{relative}/{name}")
            };
            nodes.push(FileNode::new(child, kind));
        }
        nodes.sort_by(|a, b| b.is_dir().cmp(&a.is_dir()).then_with(|| a.name.cmp(&b.name)));
        Ok(nodes)
    }

    pub async fn read_content(&self, path: &str) -> SyncResult<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|source| SyncError::Io { path: full, source })
    }

    /// Write locally, then start the upload.
    ///
    /// The local write has completed when this returns; the upload runs on
    /// its own task. Uploads of one path land in local write order, and
    /// durable storage ends on the content of the last local write.
    pub async fn write_content(&self, path: &str, content: Bytes) -> SyncResult<PendingUpload> {
        let relative = normalize_path(path)?;
        if relative.is_empty() {
            return Err(SyncError::InvalidPath(path.to_string()));
        }
        let full = self.root.join(&relative);
        let slot = self.slot(&relative);

        let seq = {
            let _writing = slot.write.lock().await;
            if let Some(parent) = full.parent() {
                create_dir(parent).await?;
            }
            tokio::fs::write(&full, &content)
                .await
                .map_err(|source| SyncError::Io { path: full, source })?;
            slot.latest.fetch_add(1, Ordering::SeqCst) + 1
        };

        let key = object_key(&self.workspace_id, &relative);
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let _uploading = slot.upload.lock().await;
            if slot.latest.load(Ordering::SeqCst) != seq {
                debug!(%key, seq, "upload superseded");
                return Ok(UploadOutcome::Superseded);
            }
            let result = store.put_object(&key, content).await;
            match &result {
                Ok(version) => debug!(%key, ?version, "uploaded"),
                Err(e) => warn!(%key, error = %e, "upload failed"),
            }
            result.map(UploadOutcome::Stored)
        });
        Ok(PendingUpload(handle))
    }

    fn slot(&self, relative: &str) -> Arc<PathSlot> {
        let mut slots = self.slots.lock();
        // Drop slots with no write or upload in flight.
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        slots.entry(relative.to_string()).or_default().clone()
    }

    /// Re-list the root and fold new entries into `tree`.
    pub async fn refresh_root(&self, tree: &mut FileTree) -> SyncResult<Vec<FileNode>> {
        let root = self.list_children("").await?;
        let added = tree.merge(root);
        debug!(added, total = tree.len(), "root refreshed");
        Ok(tree.nodes())
    }

    /// Download every stored file into the local root. Returns files written.
    pub async fn hydrate(&self) -> SyncResult<u32> {
        let prefix = code_prefix(&self.workspace_id);
        let entries = list_all_objects(self.store.as_ref(), &prefix).await?;

        let mut written = 0;
        for entry in entries {
            let Some(relative) = entry.key.strip_prefix(&prefix) else {
                continue;
            };
            let target = match normalize_path(relative) {
                Ok(rel) if !rel.is_empty() => self.root.join(rel),
                _ => continue,
            };
            if is_folder_marker(&entry.key, entry.size) {
                create_dir(&target).await?;
                continue;
            }
            let body = match self.store.get_object(&entry.key, None).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "skipping file during hydrate");
                    continue;
                }
            };
            if let Some(parent) = target.parent() {
                create_dir(parent).await?;
            }
            tokio::fs::write(&target, &body)
                .await
                .map_err(|source| SyncError::Io { path: target, source })?;
            written += 1;
        }
        info!(workspace_id = %self.workspace_id, files = written, "workspace hydrated");
        Ok(written)
    }

    fn resolve(&self, path: &str) -> SyncResult<PathBuf> {
        Ok(self.root.join(normalize_path(path)?))
    }
}

async fn create_dir(path: &Path) -> SyncResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Canonical workspace-relative form of a client path.
///
/// A leading `/` is dropped; `..` and anything else escaping the root is
/// rejected. The root itself is the empty string.
pub fn normalize_path(path: &str) -> SyncResult<String> {
    let trimmed = path.trim_start_matches('/');
    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::InvalidPath(path.to_string()));
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use replgrid_storage::{MemoryObjectStore, ObjectPage, VersionMarker, VersionPage};

    /// Holds the first put back so a later put can overtake it.
    struct SlowFirstPut {
        inner: MemoryObjectStore,
        puts: AtomicU32,
    }

    #[async_trait]
    impl ObjectStore for SlowFirstPut {
        async fn list_objects(
            &self,
            prefix: &str,
            token: Option<String>,
        ) -> StorageResult<ObjectPage> {
            self.inner.list_objects(prefix, token).await
        }

        async fn list_versions(
            &self,
            prefix: &str,
            marker: Option<VersionMarker>,
        ) -> StorageResult<VersionPage> {
            self.inner.list_versions(prefix, marker).await
        }

        async fn put_object(&self, key: &str, body: Bytes) -> StorageResult<Option<String>> {
            if self.puts.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            self.inner.put_object(key, body).await
        }

        async fn get_object(&self, key: &str, version: Option<&str>) -> StorageResult<Bytes> {
            self.inner.get_object(key, version).await
        }

        async fn copy_object(
            &self,
            src_key: &str,
            src_version: Option<&str>,
            dest_key: &str,
        ) -> StorageResult<()> {
            self.inner.copy_object(src_key, src_version, dest_key).await
        }
    }

    fn slow_setup() -> (tempfile::TempDir, Arc<SlowFirstPut>, WorkspaceSync) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SlowFirstPut {
            inner: MemoryObjectStore::new(),
            puts: AtomicU32::new(0),
        });
        let sync = WorkspaceSync::new(
            dir.path(),
            WorkspaceId::parse("abc").unwrap(),
            store.clone(),
        );
        (dir, store, sync)
    }

    fn setup() -> (tempfile::TempDir, Arc<MemoryObjectStore>, WorkspaceSync) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let sync = WorkspaceSync::new(
            dir.path(),
            WorkspaceId::parse("abc").unwrap(),
            store.clone(),
        );
        (dir, store, sync)
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("").unwrap(), "");
        assert_eq!(normalize_path("/src/main.py").unwrap(), "src/main.py");
        assert_eq!(normalize_path("./src//lib").unwrap(), "src/lib");
        assert!(matches!(normalize_path("../etc/passwd"), Err(SyncError::InvalidPath(_))));
        assert!(matches!(normalize_path("src/../../x"), Err(SyncError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn lists_only_immediate_children() {
        let (dir, _store, sync) = setup();
        std::fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        std::fs::write(dir.path().join("src/main.py"), "x").unwrap();
        std::fs::write(dir.path().join("src/lib/util.py"), "y").unwrap();
        std::fs::write(dir.path().join("README.md"), "z").unwrap();

        let root = sync.list_children("").await.unwrap();
        let paths: Vec<_> = root.iter().map(|n| (n.path.as_str(), n.kind)).collect();
        assert_eq!(paths, vec![("src", NodeKind::Directory), ("README.md", NodeKind::File)]);

        let src = sync.list_children("src").await.unwrap();
        let paths: Vec<_> = src.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["src/lib", "src/main.py"]);
        assert!(src.iter().all(|n| n.content.is_none()));
    }

    #[tokio::test]
    async fn write_is_visible_and_uploaded() {
        let (dir, store, sync) = setup();
        let pending = sync
            .write_content("src/app.py", Bytes::from_static(b"print('hi')"))
            .await
            .unwrap();
        // Local copy is in place before the upload is awaited.
        assert_eq!(sync.read_content("src/app.py").await.unwrap(), b"print('hi')");
        assert!(dir.path().join("src/app.py").exists());

        let outcome = pending.wait().await.unwrap();
        assert_eq!(outcome, UploadOutcome::Stored(Some("v1".to_string())));
        assert_eq!(
            store.get_object("code/abc/src/app.py", None).await.unwrap(),
            Bytes::from_static(b"print('hi')")
        );
    }

    #[tokio::test]
    async fn last_write_wins() {
        let (_dir, store, sync) = setup();
        sync.write_content("a.py", Bytes::from("one")).await.unwrap().wait().await.unwrap();
        sync.write_content("a.py", Bytes::from("two")).await.unwrap().wait().await.unwrap();
        assert_eq!(sync.read_content("a.py").await.unwrap(), b"two");
        assert_eq!(store.version_count("code/abc/a.py"), 2);
    }

    #[tokio::test]
    async fn slow_earlier_upload_does_not_overwrite_later_edit() {
        let (_dir, store, sync) = slow_setup();
        let first = sync.write_content("a.py", Bytes::from("one")).await.unwrap();
        let second = sync.write_content("a.py", Bytes::from("two")).await.unwrap();
        first.wait().await.unwrap();
        assert_eq!(
            second.wait().await.unwrap(),
            UploadOutcome::Stored(Some("v2".to_string()))
        );

        assert_eq!(sync.read_content("a.py").await.unwrap(), b"two");
        assert_eq!(
            store.get_object("code/abc/a.py", None).await.unwrap(),
            Bytes::from("two")
        );
    }

    #[tokio::test]
    async fn concurrent_edits_end_on_last_local_write() {
        let (_dir, store, sync) = slow_setup();
        let sync = Arc::new(sync);
        let mut pending = Vec::new();
        for i in 0..8 {
            let body = Bytes::from(format!("edit {i}"));
            pending.push(sync.write_content("a.py", body).await.unwrap());
        }
        let mut stored = 0;
        for upload in pending {
            if let UploadOutcome::Stored(_) = upload.wait().await.unwrap() {
                stored += 1;
            }
        }
        assert!(stored >= 1);

        let local = sync.read_content("a.py").await.unwrap();
        assert_eq!(local, b"edit 7");
        let durable = store.get_object("code/abc/a.py", None).await.unwrap();
        assert_eq!(durable, Bytes::from(local));
    }

    #[tokio::test]
    async fn edits_to_different_paths_upload_independently() {
        let (_dir, store, sync) = slow_setup();
        // The first put (a.py) is slow; b.py must not wait for it.
        let a = sync.write_content("a.py", Bytes::from("a")).await.unwrap();
        let b = sync.write_content("b.py", Bytes::from("b")).await.unwrap();
        let started = tokio::time::Instant::now();
        b.wait().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));
        a.wait().await.unwrap();
        assert_eq!(store.get_object("code/abc/a.py", None).await.unwrap(), Bytes::from("a"));
    }

    #[tokio::test]
    async fn idle_path_slots_are_pruned() {
        let (_dir, _store, sync) = setup();
        sync.write_content("a.py", Bytes::from("a")).await.unwrap().wait().await.unwrap();
        sync.write_content("b.py", Bytes::from("b")).await.unwrap().wait().await.unwrap();
        assert!(sync.slots.lock().len() <= 1);
    }

    #[tokio::test]
    async fn write_rejects_escaping_paths() {
        let (_dir, _store, sync) = setup();
        assert!(matches!(
            sync.write_content("../outside", Bytes::new()).await,
            Err(SyncError::InvalidPath(_))
        ));
        assert!(matches!(
            sync.write_content("/", Bytes::new()).await,
            Err(SyncError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn upload_failure_does_not_undo_local_write() {
        let (_dir, store, sync) = setup();
        store.fail_key("code/abc/a.py");
        let pending = sync.write_content("a.py", Bytes::from("local")).await.unwrap();
        assert!(matches!(pending.wait().await, Err(SyncError::Storage(_))));
        assert_eq!(sync.read_content("a.py").await.unwrap(), b"local");
    }

    #[tokio::test]
    async fn refresh_merges_out_of_band_files() {
        let (dir, _store, sync) = setup();
        std::fs::write(dir.path().join("a.py"), "a").unwrap();
        let mut tree = FileTree::default();
        tree.merge(sync.list_children("").await.unwrap());
        assert_eq!(tree.len(), 1);

        std::fs::write(dir.path().join("b.py"), "b").unwrap();
        let nodes = sync.refresh_root(&mut tree).await.unwrap();
        let paths: Vec<_> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py"]);

        // A second refresh adds nothing.
        sync.refresh_root(&mut tree).await.unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[tokio::test]
    async fn hydrate_downloads_prefix() {
        let (dir, store, sync) = setup();
        store.put_object("code/abc/main.py", Bytes::from("main")).await.unwrap();
        store.put_object("code/abc/pkg/mod.py", Bytes::from("mod")).await.unwrap();
        store.put_object("code/abc/empty/", Bytes::new()).await.unwrap();
        store.put_object("code/other/x.py", Bytes::from("no")).await.unwrap();

        assert_eq!(sync.hydrate().await.unwrap(), 2);
        assert_eq!(std::fs::read(dir.path().join("pkg/mod.py")).unwrap(), b"mod");
        assert!(dir.path().join("empty").is_dir());
        assert!(!dir.path().join("x.py").exists());
    }

    #[test]
    fn file_tree_dedups_by_path() {
        let mut tree = FileTree::default();
        let nodes = [FileNode::new("a", NodeKind::File), FileNode::new("b", NodeKind::File)];
        assert_eq!(tree.merge(nodes), 2);
        assert_eq!(tree.merge([FileNode::new("a", NodeKind::File)]), 0);
        assert_eq!(tree.len(), 2);
    }
}
