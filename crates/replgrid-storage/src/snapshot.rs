//! Snapshot capture and restore, and whole-prefix cloning.
//!
//! Snapshots are manifests of version ids, never bytes. Restoring copies a
//! historical version onto the live key, which adds a new version; nothing
//! written after the capture is lost.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use replgrid_core::layout::{base_prefix, code_prefix, is_folder_marker, normalize_prefix};
use replgrid_core::{Snapshot, SnapshotFile, WorkspaceId, epoch_secs, normalize_label};

use crate::error::StorageResult;
use crate::object::{ObjectStore, list_all_objects, list_latest_versions};

/// Maximum in-flight copies per batch.
const COPY_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub path: String,
    pub error: String,
}

/// Aggregate outcome of a per-path batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: u32,
    /// Paths that needed no work (already at the target version, folder markers).
    pub skipped: u32,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, path: String, result: StorageResult<()>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => self.failed.push(BatchFailure {
                path,
                error: e.to_string(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn ObjectStore>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Record the latest version id and size of every file of a workspace.
    pub async fn capture(
        &self,
        id: &WorkspaceId,
        label: Option<&str>,
        owner_user_id: &str,
    ) -> StorageResult<Snapshot> {
        let prefix = code_prefix(id);
        let latest = list_latest_versions(self.store.as_ref(), &prefix).await?;

        let mut files: Vec<SnapshotFile> = latest
            .into_iter()
            .filter(|v| !is_folder_marker(&v.key, v.size))
            .filter_map(|v| {
                let path = v.key.strip_prefix(&prefix)?.to_string();
                Some(SnapshotFile {
                    path,
                    version_id: v.version_id,
                    size: v.size,
                })
            })
            .filter(|f| !f.path.is_empty())
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            workspace_id: id.clone(),
            label: normalize_label(label),
            files,
            owner_user_id: owner_user_id.to_string(),
            created_at: epoch_secs(),
        };
        info!(
            workspace_id = %id,
            snapshot_id = %snapshot.id,
            files = snapshot.files.len(),
            "snapshot captured"
        );
        Ok(snapshot)
    }

    /// Point every captured path back at its captured version.
    ///
    /// Paths already at that version are skipped. Files created after the
    /// capture are left untouched.
    pub async fn restore(&self, id: &WorkspaceId, snapshot: &Snapshot) -> BatchReport {
        let prefix = code_prefix(id);
        let current: HashMap<String, String> =
            match list_latest_versions(self.store.as_ref(), &prefix).await {
                Ok(versions) => versions.into_iter().map(|v| (v.key, v.version_id)).collect(),
                Err(e) => {
                    warn!(
                        workspace_id = %id,
                        error = %e,
                        "could not list current versions, restoring every path"
                    );
                    HashMap::new()
                }
            };

        let mut report = BatchReport::default();
        let mut pending = Vec::new();
        for file in &snapshot.files {
            let key = format!("{prefix}{}", file.path);
            if current.get(&key) == Some(&file.version_id) {
                report.skipped += 1;
            } else {
                pending.push((file.path.clone(), key, file.version_id.clone()));
            }
        }

        let results: Vec<_> = stream::iter(pending)
            .map(|(path, key, version)| async move {
                let result = self.store.copy_object(&key, Some(&version), &key).await;
                (path, result)
            })
            .buffer_unordered(COPY_CONCURRENCY)
            .collect()
            .await;
        for (path, result) in results {
            if let Err(e) = &result {
                warn!(%path, error = %e, "restore of path failed");
            }
            report.record(path, result);
        }

        info!(
            workspace_id = %id,
            snapshot_id = %snapshot.id,
            restored = report.succeeded,
            skipped = report.skipped,
            failed = report.failed.len(),
            "snapshot restored"
        );
        report
    }

    /// Copy every object under `src_prefix` to the same relative key under `dest_prefix`.
    ///
    /// A listing failure is returned as an error; per-object failures are
    /// reported in the batch.
    pub async fn clone_prefix(
        &self,
        src_prefix: &str,
        dest_prefix: &str,
    ) -> StorageResult<BatchReport> {
        let src = normalize_prefix(src_prefix);
        let dest = normalize_prefix(dest_prefix);
        let entries = list_all_objects(self.store.as_ref(), &src).await?;

        let mut report = BatchReport::default();
        let mut pending = Vec::new();
        for entry in entries {
            if is_folder_marker(&entry.key, entry.size) {
                report.skipped += 1;
                continue;
            }
            let Some(relative) = entry.key.strip_prefix(&src) else {
                continue;
            };
            pending.push((relative.to_string(), entry.key.clone()));
        }

        let results: Vec<_> = stream::iter(pending)
            .map(|(relative, src_key)| {
                let dest_key = format!("{dest}{relative}");
                async move {
                    let result = self.store.copy_object(&src_key, None, &dest_key).await;
                    (relative, result)
                }
            })
            .buffer_unordered(COPY_CONCURRENCY)
            .collect()
            .await;
        for (path, result) in results {
            if let Err(e) = &result {
                warn!(%path, error = %e, "copy failed");
            }
            report.record(path, result);
        }

        debug!(
            %src,
            %dest,
            copied = report.succeeded,
            failed = report.failed.len(),
            "prefix cloned"
        );
        Ok(report)
    }

    /// Fork: copy all files of `source` into `dest`.
    pub async fn clone_workspace(
        &self,
        source: &WorkspaceId,
        dest: &WorkspaceId,
    ) -> StorageResult<BatchReport> {
        self.clone_prefix(&code_prefix(source), &code_prefix(dest)).await
    }

    /// Seed a fresh workspace from the language template.
    pub async fn seed_from_template(
        &self,
        language: &str,
        dest: &WorkspaceId,
    ) -> StorageResult<BatchReport> {
        self.clone_prefix(&base_prefix(language), &code_prefix(dest)).await
    }
}
