//! replgrid-storage — durable, versioned workspace storage.
//!
//! Everything a workspace owns lives under `code/{workspace_id}/` in a
//! versioned object store. This crate provides:
//!
//! - [`ObjectStore`]: the storage seam (list, list versions, put, get, copy)
//! - [`S3Store`]: an S3-compatible backend via `aws-sdk-s3`
//! - [`MemoryObjectStore`]: an in-process backend with a per-path version counter
//! - [`SnapshotStore`]: capture, restore and prefix cloning on top of any backend
//!
//! Batch operations treat every path independently and report a
//! [`BatchReport`] instead of failing on the first error.

pub mod error;
pub mod memory;
pub mod object;
pub mod s3;
pub mod snapshot;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryObjectStore;
pub use object::{ObjectEntry, ObjectPage, ObjectStore, VersionEntry, VersionMarker, VersionPage};
pub use s3::S3Store;
pub use snapshot::{BatchFailure, BatchReport, SnapshotStore};
