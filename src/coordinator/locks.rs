//! Per-document write locks
//!
//! One async mutex per document id, created on first use. Different ids
//! never contend. Guards are owned so they can move into blocking commit
//! tasks and outlive the future that acquired them.

use crate::document::DocumentId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: &DocumentId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: &DocumentId) -> OwnedMutexGuard<()> {
        self.handle(id).lock_owned().await
    }

    /// Exclusive access to `id` if nobody holds it.
    pub fn try_acquire(&self, id: &DocumentId) -> Option<OwnedMutexGuard<()>> {
        self.handle(id).try_lock_owned().ok()
    }

    /// Drop entries no task holds or waits on.
    pub fn prune_idle(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
