//! Per-workspace serialization of lifecycle calls.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use replgrid_core::WorkspaceId;

#[derive(Clone, Default)]
pub struct WorkspaceLocks {
    inner: Arc<Mutex<HashMap<WorkspaceId, Arc<AsyncMutex<()>>>>>,
}

impl WorkspaceLocks {
    /// Wait for exclusive use of `id`. Released when the guard drops.
    pub async fn lock(&self, id: &WorkspaceId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock();
            // Drop slots nobody holds or waits on.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            map.entry(id.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
