//! Durable storage key layout.
//!
//! ```text
//! code/{workspace_id}/{relative_path}   live workspace files
//! base/{language}/{relative_path}       language seed templates
//! ```
//!
//! Prefixes always end in `/` so `code/abc/` never matches `code/abcd/`.

use crate::WorkspaceId;

/// Storage prefix holding a workspace's files.
pub fn code_prefix(id: &WorkspaceId) -> String {
    format!("code/{id}/")
}

/// Storage prefix holding the seed template of a language.
pub fn base_prefix(language: &str) -> String {
    format!("base/{}/", language.trim_matches('/'))
}

/// Object key of a workspace-relative path.
pub fn object_key(id: &WorkspaceId, path: &str) -> String {
    format!("{}{}", code_prefix(id), path.trim_start_matches('/'))
}

/// Ensure a prefix ends with exactly one `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

/// Zero-byte keys ending with `/` are folder markers, not files.
pub fn is_folder_marker(key: &str, size: u64) -> bool {
    size == 0 && key.ends_with('/')
}
