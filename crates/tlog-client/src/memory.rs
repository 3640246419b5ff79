use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use rand::Rng;
use tlog_crypto::{LogHasher, SigningKey, VerifyingKey};
use tlog_types::{Digest, TreeId};
use tracing::debug;

use crate::error::{LogError, LogResult};
use crate::leaf::{
    AppendResult, LeafInput, LeafStatus, LogLeaf, LogRoot, QueuedLeafProof, SignedLogRoot,
};
use crate::traits::LogClient;

/// Fault to inject into the next append, for exercising partial failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendFault {
    /// Fail before committing anything.
    Unavailable,
    /// Commit the batch, then report a timeout.
    TimeoutAfterCommit,
    /// Reject the last leaf of the batch; the leaves before it commit.
    RejectLast,
}

/// In-process log service for tests, local demos, and embedding.
///
/// Trees are kept in memory and roots are computed with RFC 6962 hashing
/// and signed with a per-instance Ed25519 key.
pub struct InMemoryLogClient {
    signer: SigningKey,
    inner: RwLock<LogState>,
    faults: Mutex<VecDeque<AppendFault>>,
}

#[derive(Default)]
struct LogState {
    trees: BTreeMap<TreeId, Vec<LogLeaf>>,
}

impl InMemoryLogClient {
    pub fn new() -> Self {
        Self::with_signer(SigningKey::generate())
    }

    pub fn with_signer(signer: SigningKey) -> Self {
        Self {
            signer,
            inner: RwLock::new(LogState::default()),
            faults: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a fault for a future append. Faults fire in FIFO order.
    pub fn inject_append_fault(&self, fault: AppendFault) {
        self.faults.lock().expect("lock poisoned").push_back(fault);
    }

    /// Number of committed leaves in `tree`.
    pub fn leaf_count(&self, tree: TreeId) -> LogResult<usize> {
        let state = self.read_state()?;
        state
            .trees
            .get(&tree)
            .map(Vec::len)
            .ok_or(LogError::TreeNotFound(tree))
    }

    fn read_state(&self) -> LogResult<std::sync::RwLockReadGuard<'_, LogState>> {
        self.inner
            .read()
            .map_err(|_| LogError::Unavailable("log state lock poisoned".into()))
    }

    fn write_state(&self) -> LogResult<std::sync::RwLockWriteGuard<'_, LogState>> {
        self.inner
            .write()
            .map_err(|_| LogError::Unavailable("log state lock poisoned".into()))
    }

    fn next_fault(&self) -> Option<AppendFault> {
        self.faults.lock().expect("lock poisoned").pop_front()
    }

    fn root_of(leaves: &[LogLeaf]) -> LogRoot {
        let hashes: Vec<Digest> = leaves.iter().map(|l| l.merkle_leaf_hash).collect();
        LogRoot {
            tree_size: leaves.len() as u64,
            root_hash: LogHasher::root(&hashes),
            timestamp_nanos: now_nanos(),
        }
    }
}

impl Default for InMemoryLogClient {
    fn default() -> Self {
        Self::new()
    }
}

fn now_nanos() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .map(|n| n.max(0) as u64)
        .unwrap_or_default()
}

#[async_trait]
impl LogClient for InMemoryLogClient {
    async fn tree_new(&self) -> LogResult<TreeId> {
        let mut state = self.write_state()?;
        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate = TreeId(rng.gen_range(1..i64::MAX));
            if !state.trees.contains_key(&candidate) {
                break candidate;
            }
        };
        state.trees.insert(id, Vec::new());
        debug!(tree_id = %id, "created tree");
        Ok(id)
    }

    async fn trees_all(&self) -> LogResult<Vec<TreeId>> {
        Ok(self.read_state()?.trees.keys().copied().collect())
    }

    async fn leaves_append(
        &self,
        tree: TreeId,
        leaves: Vec<LeafInput>,
    ) -> LogResult<AppendResult> {
        let fault = self.next_fault();
        if fault == Some(AppendFault::Unavailable) {
            return Err(LogError::Unavailable("injected fault".into()));
        }

        let mut state = self.write_state()?;
        let stored = state
            .trees
            .get_mut(&tree)
            .ok_or(LogError::TreeNotFound(tree))?;

        let reject_at = match fault {
            Some(AppendFault::RejectLast) => leaves.len().checked_sub(1),
            _ => None,
        };

        let mut queued = Vec::with_capacity(leaves.len());
        for (i, input) in leaves.into_iter().enumerate() {
            let merkle_leaf_hash = input.merkle_leaf_hash();
            if Some(i) == reject_at {
                queued.push((
                    LogLeaf {
                        value: input.value,
                        extra_data: input.extra_data,
                        merkle_leaf_hash,
                        index: -1,
                    },
                    LeafStatus::Rejected("injected rejection".into()),
                ));
                continue;
            }
            let leaf = LogLeaf {
                value: input.value,
                extra_data: input.extra_data,
                merkle_leaf_hash,
                index: stored.len() as i64,
            };
            stored.push(leaf.clone());
            queued.push((leaf, LeafStatus::Ok));
        }

        let hashes: Vec<Digest> = stored.iter().map(|l| l.merkle_leaf_hash).collect();
        let proofs = queued
            .into_iter()
            .map(|(leaf, status)| {
                let inclusion_proof = if status == LeafStatus::Ok {
                    LogHasher::inclusion_proof(&hashes, leaf.index as usize).unwrap_or_default()
                } else {
                    Vec::new()
                };
                QueuedLeafProof {
                    leaf,
                    status,
                    inclusion_proof,
                }
            })
            .collect();
        let root = Self::root_of(stored);
        debug!(tree_id = %tree, tree_size = root.tree_size, "appended leaves");

        if fault == Some(AppendFault::TimeoutAfterCommit) {
            return Err(LogError::Timeout {
                op: "leaves_append".into(),
                after_ms: 0,
            });
        }
        Ok(AppendResult { proofs, root })
    }

    async fn leaves_by_range(
        &self,
        tree: TreeId,
        start: i64,
        count: i64,
    ) -> LogResult<Vec<LogLeaf>> {
        if start < 0 || count < 0 {
            return Err(LogError::InvalidRange { start, count });
        }
        let state = self.read_state()?;
        let stored = state.trees.get(&tree).ok_or(LogError::TreeNotFound(tree))?;
        Ok(stored
            .iter()
            .filter(|l| l.index >= start)
            .take(count as usize)
            .cloned()
            .collect())
    }

    async fn signed_log_root(&self, tree: TreeId) -> LogResult<SignedLogRoot> {
        let state = self.read_state()?;
        let stored = state.trees.get(&tree).ok_or(LogError::TreeNotFound(tree))?;
        let log_root = Self::root_of(stored).to_bytes()?;
        Ok(SignedLogRoot {
            signature: self.signer.sign(&log_root),
            log_root,
        })
    }

    fn public_key(&self) -> VerifyingKey {
        self.signer.verifying_key()
    }
}

impl std::fmt::Debug for InMemoryLogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let trees = self.inner.read().map(|s| s.trees.len()).unwrap_or_default();
        f.debug_struct("InMemoryLogClient")
            .field("tree_count", &trees)
            .finish()
    }
}
