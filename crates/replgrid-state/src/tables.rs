//! redb table definitions.

use redb::TableDefinition;

/// Workspace records keyed by `{workspace_id}`.
pub const WORKSPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("workspaces");

/// Snapshot records keyed by `{workspace_id}:{snapshot_id}`.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
