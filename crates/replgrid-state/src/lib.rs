//! replgrid-state — embedded registry for replgrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds the workspace records the
//! control surface consults (known ids, language, owner) and the immutable
//! snapshot records produced by captures.
//!
//! Values are JSON-serialized into redb's `&[u8]` columns. Snapshot keys are
//! `{workspace_id}:{snapshot_id}` so a workspace's snapshots share a prefix.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
