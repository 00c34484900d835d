//! In-process versioned object store.
//!
//! Keeps every version of every key. Version ids come from a per-path
//! counter (`v1`, `v2`, ...), which gives the same last-write-wins history
//! an S3 bucket with versioning enabled provides.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::object::{ObjectEntry, ObjectPage, ObjectStore, VersionEntry, VersionMarker, VersionPage};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredVersion {
    id: String,
    body: Bytes,
}

pub struct MemoryObjectStore {
    /// key → versions, oldest first.
    objects: Mutex<BTreeMap<String, Vec<StoredVersion>>>,
    page_size: usize,
    failing_keys: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Small pages exercise continuation handling.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            failing_keys: Mutex::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
        }
    }

    /// Make writes, reads and copies touching `key` fail.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().insert(key.to_string());
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn version_count(&self, key: &str) -> usize {
        self.objects.lock().get(key).map_or(0, Vec::len)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    fn check_key(&self, key: &str) -> StorageResult<()> {
        if self.failing_keys.lock().contains(key) {
            return Err(StorageError::Request(format!("injected failure for {key}")));
        }
        Ok(())
    }

    fn check_listing(&self) -> StorageResult<()> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StorageError::Request("injected listing failure".to_string()));
        }
        Ok(())
    }

    fn write_version(&self, key: &str, body: Bytes) -> String {
        let mut objects = self.objects.lock();
        let versions = objects.entry(key.to_string()).or_default();
        let id = format!("v{}", versions.len() + 1);
        versions.push(StoredVersion {
            id: id.clone(),
            body,
        });
        id
    }

    fn read_version(&self, key: &str, version: Option<&str>) -> StorageResult<Bytes> {
        let objects = self.objects.lock();
        let versions = objects.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let found = match version {
            Some(v) => versions.iter().find(|sv| sv.id == v),
            None => versions.last(),
        };
        found.map(|sv| sv.body.clone()).ok_or_else(|| match version {
            Some(v) => StorageError::VersionNotFound {
                key: key.to_string(),
                version: v.to_string(),
            },
            None => StorageError::NotFound {
                key: key.to_string(),
            },
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_objects(&self, prefix: &str, token: Option<String>) -> StorageResult<ObjectPage> {
        self.check_listing()?;
        let objects = self.objects.lock();
        let mut entries: Vec<ObjectEntry> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| token.as_deref().is_none_or(|t| key.as_str() > t))
            .filter_map(|(key, versions)| {
                versions.last().map(|latest| ObjectEntry {
                    key: key.clone(),
                    size: latest.body.len() as u64,
                })
            })
            .take(self.page_size + 1)
            .collect();

        let next_token = if entries.len() > self.page_size {
            entries.truncate(self.page_size);
            entries.last().map(|e| e.key.clone())
        } else {
            None
        };
        Ok(ObjectPage { entries, next_token })
    }

    async fn list_versions(
        &self,
        prefix: &str,
        marker: Option<VersionMarker>,
    ) -> StorageResult<VersionPage> {
        self.check_listing()?;
        let objects = self.objects.lock();

        // Keys ascending, versions newest first within a key.
        let all: Vec<VersionEntry> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .flat_map(|(key, versions)| {
                let latest = versions.len().saturating_sub(1);
                versions.iter().enumerate().rev().map(move |(i, sv)| VersionEntry {
                    key: key.clone(),
                    version_id: sv.id.clone(),
                    size: sv.body.len() as u64,
                    is_latest: i == latest,
                })
            })
            .collect();

        let start = match &marker {
            None => 0,
            Some(m) => all
                .iter()
                .position(|v| {
                    v.key == m.key_marker
                        && Some(v.version_id.as_str()) == m.version_id_marker.as_deref()
                })
                .map_or(all.len(), |i| i + 1),
        };

        let end = (start + self.page_size).min(all.len());
        let versions = all[start..end].to_vec();
        let next_marker = if end < all.len() {
            versions.last().map(|v| VersionMarker {
                key_marker: v.key.clone(),
                version_id_marker: Some(v.version_id.clone()),
            })
        } else {
            None
        };
        Ok(VersionPage {
            versions,
            next_marker,
        })
    }

    async fn put_object(&self, key: &str, body: Bytes) -> StorageResult<Option<String>> {
        self.check_key(key)?;
        Ok(Some(self.write_version(key, body)))
    }

    async fn get_object(&self, key: &str, version: Option<&str>) -> StorageResult<Bytes> {
        self.check_key(key)?;
        self.read_version(key, version)
    }

    async fn copy_object(
        &self,
        src_key: &str,
        src_version: Option<&str>,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.check_key(src_key)?;
        self.check_key(dest_key)?;
        let body = self.read_version(src_key, src_version)?;
        self.write_version(dest_key, body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{list_all_objects, list_latest_versions};

    #[tokio::test]
    async fn versions_count_per_path() {
        let store = MemoryObjectStore::new();
        let v = store.put_object("code/a/x", Bytes::from("1")).await.unwrap();
        assert_eq!(v.as_deref(), Some("v1"));
        let v = store.put_object("code/a/x", Bytes::from("2")).await.unwrap();
        assert_eq!(v.as_deref(), Some("v2"));
        let v = store.put_object("code/a/y", Bytes::from("1")).await.unwrap();
        assert_eq!(v.as_deref(), Some("v1"));

        assert_eq!(store.get_object("code/a/x", None).await.unwrap(), Bytes::from("2"));
        assert_eq!(store.get_object("code/a/x", Some("v1")).await.unwrap(), Bytes::from("1"));
        assert!(matches!(
            store.get_object("code/a/x", Some("v9")).await,
            Err(StorageError::VersionNotFound { .. })
        ));
        assert!(matches!(
            store.get_object("code/a/z", None).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn listing_paginates() {
        let store = MemoryObjectStore::with_page_size(2);
        for i in 0..5 {
            store.put_object(&format!("code/a/f{i}"), Bytes::from("x")).await.unwrap();
        }
        store.put_object("code/b/other", Bytes::from("x")).await.unwrap();

        let first = store.list_objects("code/a/", None).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert!(first.next_token.is_some());

        let all = list_all_objects(&store, "code/a/").await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn version_listing_paginates_and_flags_latest() {
        let store = MemoryObjectStore::with_page_size(2);
        for _ in 0..3 {
            store.put_object("code/a/x", Bytes::from("x")).await.unwrap();
        }
        store.put_object("code/a/y", Bytes::from("yy")).await.unwrap();

        let latest = list_latest_versions(&store, "code/a/").await.unwrap();
        let pairs: Vec<_> = latest
            .iter()
            .map(|v| (v.key.as_str(), v.version_id.as_str()))
            .collect();
        assert_eq!(pairs, vec![("code/a/x", "v3"), ("code/a/y", "v1")]);
        assert_eq!(latest[1].size, 2);
    }

    #[tokio::test]
    async fn copy_creates_new_version() {
        let store = MemoryObjectStore::new();
        store.put_object("code/a/x", Bytes::from("old")).await.unwrap();
        store.put_object("code/a/x", Bytes::from("new")).await.unwrap();
        store.copy_object("code/a/x", Some("v1"), "code/a/x").await.unwrap();
        assert_eq!(store.version_count("code/a/x"), 3);
        assert_eq!(store.get_object("code/a/x", None).await.unwrap(), Bytes::from("old"));
        assert_eq!(store.get_object("code/a/x", Some("v2")).await.unwrap(), Bytes::from("new"));
    }
}
