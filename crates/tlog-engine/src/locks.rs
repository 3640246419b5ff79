use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tlog_types::TreeId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-tree write locks.
///
/// Different trees never contend. Lock handles are created on first use and
/// kept for the life of the process.
#[derive(Default)]
pub struct TreeLocks {
    locks: Mutex<HashMap<TreeId, Arc<AsyncMutex<()>>>>,
}

/// Proof that the holder owns the write lock of `tree`.
pub struct TreeGuard {
    tree: TreeId,
    _guard: OwnedMutexGuard<()>,
}

impl TreeGuard {
    pub fn tree(&self) -> TreeId {
        self.tree
    }
}

impl std::fmt::Debug for TreeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TreeGuard({})", self.tree)
    }
}

impl TreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, tree: TreeId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("lock poisoned");
        Arc::clone(locks.entry(tree).or_default())
    }

    /// Wait for exclusive write access to `tree`.
    pub async fn lock(&self, tree: TreeId) -> TreeGuard {
        let guard = self.handle(tree).lock_owned().await;
        TreeGuard {
            tree,
            _guard: guard,
        }
    }

    /// Lock several trees, always in ascending id order so two callers
    /// locking overlapping sets cannot deadlock.
    pub async fn lock_many(&self, trees: &[TreeId]) -> Vec<TreeGuard> {
        let mut sorted = trees.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for tree in sorted {
            guards.push(self.lock(tree).await);
        }
        guards
    }
}
