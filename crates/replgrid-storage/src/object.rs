//! The object store seam.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// A live object as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub entries: Vec<ObjectEntry>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

/// One historical version of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub key: String,
    pub version_id: String,
    pub size: u64,
    pub is_latest: bool,
}

/// Resume point of a version listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMarker {
    pub key_marker: String,
    pub version_id_marker: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    pub versions: Vec<VersionEntry>,
    pub next_marker: Option<VersionMarker>,
}

/// Versioned key/value object storage.
///
/// Every `put_object` and `copy_object` creates a new version of the
/// destination key; earlier versions stay readable through `get_object`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_objects(&self, prefix: &str, token: Option<String>) -> StorageResult<ObjectPage>;

    async fn list_versions(
        &self,
        prefix: &str,
        marker: Option<VersionMarker>,
    ) -> StorageResult<VersionPage>;

    /// Write an object, returning the version id it was stored under.
    async fn put_object(&self, key: &str, body: Bytes) -> StorageResult<Option<String>>;

    /// Read the current version, or a specific one.
    async fn get_object(&self, key: &str, version: Option<&str>) -> StorageResult<Bytes>;

    /// Copy `src_key` (at `src_version` if given) onto `dest_key`.
    async fn copy_object(
        &self,
        src_key: &str,
        src_version: Option<&str>,
        dest_key: &str,
    ) -> StorageResult<()>;
}

/// Collect every live object under a prefix, following continuation tokens.
pub async fn list_all_objects(
    store: &dyn ObjectStore,
    prefix: &str,
) -> StorageResult<Vec<ObjectEntry>> {
    let mut entries = Vec::new();
    let mut token = None;
    loop {
        let page = store.list_objects(prefix, token).await?;
        entries.extend(page.entries);
        match page.next_token {
            Some(next) => token = Some(next),
            None => return Ok(entries),
        }
    }
}

/// Collect the latest version of every key under a prefix.
pub async fn list_latest_versions(
    store: &dyn ObjectStore,
    prefix: &str,
) -> StorageResult<Vec<VersionEntry>> {
    let mut latest = Vec::new();
    let mut marker = None;
    loop {
        let page = store.list_versions(prefix, marker).await?;
        latest.extend(page.versions.into_iter().filter(|v| v.is_latest));
        match page.next_marker {
            Some(next) => marker = Some(next),
            None => return Ok(latest),
        }
    }
}
