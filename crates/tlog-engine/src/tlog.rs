use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tlog_client::{
    AppendResult, LeafInput, LeafStatus, LogClient, LogLeaf, LogRoot, QueuedLeafProof,
    RetryPolicy, SignedLogRoot,
};
use tlog_crypto::{EncryptionKey, LogHasher, VerifyingKey};
use tlog_store::{descriptor, BlobEntry, BlobReader, BlobStore, BlobWriter, StagedBlob};
use tlog_types::{Digest, File, MetadataStream, RecordMetadata, TreeId};
use tracing::{debug, info, warn};

use crate::anchor::Anchor;
use crate::error::{TlogError, TlogResult};
use crate::leaf::{is_reserved_descriptor, ExtraData, LeafKind};
use crate::locks::{TreeGuard, TreeLocks};
use crate::record_index::{FreezeRecord, RecordIndex};

/// Version stamped into every sealed blob.
pub const ENCRYPTION_KEY_VERSION: u32 = 1;

/// A fully resolved record state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordContent {
    pub index: RecordIndex,
    pub record_metadata: RecordMetadata,
    /// Ordered by stream id.
    pub metadata: Vec<MetadataStream>,
    /// Ordered by file name.
    pub files: Vec<File>,
}

/// An anchor whose blob is already durable, waiting for its leaf.
#[derive(Clone, Debug)]
pub struct StagedAnchor {
    tree: TreeId,
    entry: BlobEntry,
}

impl StagedAnchor {
    pub fn tree(&self) -> TreeId {
        self.tree
    }
}

/// One record category on top of a log service and a blob store.
///
/// When an encryption key is configured every blob this tlog writes is
/// sealed, and reads transparently open sealed blobs.
pub struct Tlog {
    name: String,
    log: Arc<dyn LogClient>,
    store: Arc<dyn BlobStore>,
    encryption_key: Option<Arc<EncryptionKey>>,
    locks: TreeLocks,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Tlog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tlog")
            .field("name", &self.name)
            .field("encrypted", &self.encryption_key.is_some())
            .finish()
    }
}

impl Tlog {
    pub fn new(
        name: impl Into<String>,
        log: Arc<dyn LogClient>,
        store: Arc<dyn BlobStore>,
        encryption_key: Option<Arc<EncryptionKey>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            log,
            store,
            encryption_key,
            locks: TreeLocks::new(),
            retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_key.is_some()
    }

    /// Key the log service signs roots with.
    pub fn log_public_key(&self) -> VerifyingKey {
        self.log.public_key()
    }

    pub(crate) fn blob_store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub async fn lock_tree(&self, tree: TreeId) -> TreeGuard {
        self.locks.lock(tree).await
    }

    pub async fn lock_trees(&self, trees: &[TreeId]) -> Vec<TreeGuard> {
        self.locks.lock_many(trees).await
    }

    /// Close the underlying blob store.
    pub fn close(&self) -> TlogResult<()> {
        self.store.close()?;
        info!(tlog = %self.name, "tlog closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Trees
    // ------------------------------------------------------------------

    pub async fn tree_new(&self) -> TlogResult<TreeId> {
        let tree = self.retry.once("tree_new", self.log.tree_new()).await?;
        info!(tlog = %self.name, tree_id = %tree, "tree created");
        Ok(tree)
    }

    pub async fn trees_all(&self) -> TlogResult<Vec<TreeId>> {
        Ok(self.retry.run("trees_all", || self.log.trees_all()).await?)
    }

    pub async fn tree_exists(&self, tree: TreeId) -> TlogResult<bool> {
        match self
            .retry
            .run("signed_log_root", || self.log.signed_log_root(tree))
            .await
        {
            Ok(_) => Ok(true),
            Err(tlog_client::LogError::TreeNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn leaves_all(&self, tree: TreeId) -> TlogResult<Vec<LogLeaf>> {
        Ok(self
            .retry
            .run("leaves_all", || self.log.leaves_all(tree))
            .await?)
    }

    // ------------------------------------------------------------------
    // Record saves
    // ------------------------------------------------------------------

    /// Save a record state to `tree`. Takes the tree's write lock.
    pub async fn record_save(
        &self,
        tree: TreeId,
        record_metadata: RecordMetadata,
        metadata: Vec<MetadataStream>,
        files: Vec<File>,
    ) -> TlogResult<RecordIndex> {
        let guard = self.lock_tree(tree).await;
        self.record_save_locked(&guard, record_metadata, metadata, files)
            .await
    }

    /// Save a record state under a lock the caller already holds.
    ///
    /// Content leaves already in the tree are not appended again; the new
    /// index references the existing leaves. All blobs are written before
    /// any leaf is appended.
    pub async fn record_save_locked(
        &self,
        guard: &TreeGuard,
        record_metadata: RecordMetadata,
        metadata: Vec<MetadataStream>,
        files: Vec<File>,
    ) -> TlogResult<RecordIndex> {
        let tree = guard.tree();
        let leaves = self.leaves_all(tree).await?;
        if self
            .latest_index(tree, &leaves, |_| true)?
            .is_some_and(|index| index.frozen)
        {
            return Err(TlogError::TreeFrozen(tree));
        }

        let rm_entry = BlobEntry::from_json(descriptor::RECORD_METADATA, &record_metadata)?;
        let mut index = RecordIndex {
            version: record_metadata.version,
            iteration: record_metadata.iteration,
            record_metadata: rm_entry.key(),
            metadata: BTreeMap::new(),
            files: BTreeMap::new(),
            frozen: false,
            tree_pointer: TreeId::NONE,
        };

        let mut content = vec![(descriptor::RECORD_METADATA, rm_entry)];
        for stream in &metadata {
            let entry = BlobEntry::from_json(descriptor::METADATA_STREAM, stream)?;
            index.metadata.insert(stream.id, entry.key());
            content.push((descriptor::METADATA_STREAM, entry));
        }
        for file in &files {
            let entry = BlobEntry::from_json(descriptor::FILE, file)?;
            index.files.insert(file.name.clone(), entry.key());
            content.push((descriptor::FILE, entry));
        }

        self.commit(tree, &leaves, content, index, None).await
    }

    /// Freeze `tree`: its latest index is re-appended with `frozen` set and
    /// `tree_pointer` recorded, followed by a freeze record.
    pub async fn freeze(&self, tree: TreeId, tree_pointer: TreeId) -> TlogResult<RecordIndex> {
        let guard = self.lock_tree(tree).await;
        self.freeze_locked(&guard, tree_pointer).await
    }

    pub async fn freeze_locked(
        &self,
        guard: &TreeGuard,
        tree_pointer: TreeId,
    ) -> TlogResult<RecordIndex> {
        let tree = guard.tree();
        let leaves = self.leaves_all(tree).await?;
        let mut index = self
            .latest_index(tree, &leaves, |_| true)?
            .ok_or(TlogError::RecordNotFound(tree))?;
        if index.frozen {
            return Err(TlogError::TreeFrozen(tree));
        }
        index.frozen = true;
        index.tree_pointer = tree_pointer;

        let index = self
            .commit(
                tree,
                &leaves,
                Vec::new(),
                index,
                Some(FreezeRecord { tree_pointer }),
            )
            .await?;
        info!(tlog = %self.name, tree_id = %tree, tree_pointer = %tree_pointer, "tree frozen");
        Ok(index)
    }

    async fn commit(
        &self,
        tree: TreeId,
        leaves: &[LogLeaf],
        content: Vec<(&str, BlobEntry)>,
        index: RecordIndex,
        freeze: Option<FreezeRecord>,
    ) -> TlogResult<RecordIndex> {
        let existing: HashSet<Digest> = leaves.iter().map(|l| l.merkle_leaf_hash).collect();

        let mut staged = Vec::with_capacity(content.len() + 2);
        let mut inputs = Vec::with_capacity(content.len() + 2);
        let mut queued = HashSet::new();
        for (desc, entry) in &content {
            let key = entry.key();
            staged.push(self.seal(entry)?);
            if existing.contains(&key) || !queued.insert(key) {
                continue;
            }
            inputs.push(leaf_input(desc, entry));
        }

        let index_entry = BlobEntry::from_json(descriptor::RECORD_INDEX, &index)?;
        staged.push(self.seal(&index_entry)?);
        inputs.push(leaf_input(descriptor::RECORD_INDEX, &index_entry));

        if let Some(freeze) = &freeze {
            let entry = BlobEntry::from_json(descriptor::FREEZE_RECORD, freeze)?;
            staged.push(self.seal(&entry)?);
            inputs.push(leaf_input(descriptor::FREEZE_RECORD, &entry));
        }

        self.store.put(&staged)?;

        let appended = inputs.len();
        let result = self.append_batch(tree, inputs, leaves.len()).await?;
        check_rejected(tree, &result)?;

        info!(
            tlog = %self.name,
            tree_id = %tree,
            version = index.version,
            iteration = index.iteration,
            leaves = appended,
            tree_size = result.root.tree_size,
            "record index appended"
        );
        Ok(index)
    }

    /// Append a batch, retrying transient failures.
    ///
    /// After every transient failure the tree is re-read, the last attempt
    /// included: an ambiguous failure (such as a timeout) may have committed
    /// the batch, in which case it is reported as appended and not submitted
    /// again. The caller must hold the tree's write lock.
    async fn append_batch(
        &self,
        tree: TreeId,
        inputs: Vec<LeafInput>,
        size_before: usize,
    ) -> TlogResult<AppendResult> {
        let attempts = self.retry.attempts.max(1);
        let mut delay_ms = self.retry.base_delay_ms;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self
                .retry
                .once("leaves_append", self.log.leaves_append(tree, inputs.clone()))
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e.into()),
            };

            let current = self.leaves_all(tree).await?;
            if let Some(result) = reconcile(&current, size_before, &inputs) {
                warn!(
                    tlog = %self.name,
                    tree_id = %tree,
                    error = %err,
                    "append reported failure after committing"
                );
                return Ok(result);
            }
            if current.len() != size_before {
                return Err(TlogError::Corrupt {
                    tree,
                    reason: format!(
                        "tree size changed from {size_before} to {} during a locked append",
                        current.len()
                    ),
                });
            }
            if attempt >= attempts {
                return Err(err.into());
            }

            warn!(
                tlog = %self.name,
                tree_id = %tree,
                attempt,
                max_attempts = attempts,
                delay_ms,
                error = %err,
                "append failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            delay_ms = delay_ms.saturating_mul(2);
        }
    }

    // ------------------------------------------------------------------
    // Record reads
    // ------------------------------------------------------------------

    /// The most recent valid record state of `tree`.
    pub async fn record_latest(&self, tree: TreeId) -> TlogResult<RecordContent> {
        self.record_where(tree, |_| true).await
    }

    /// The most recent valid iteration of `version`.
    pub async fn record_version(&self, tree: TreeId, version: u32) -> TlogResult<RecordContent> {
        self.record_where(tree, |index| index.version == version)
            .await
    }

    /// The latest valid record index without resolving its content.
    pub async fn record_index_latest(&self, tree: TreeId) -> TlogResult<RecordIndex> {
        let leaves = self.leaves_all(tree).await?;
        self.latest_index(tree, &leaves, |_| true)?
            .ok_or(TlogError::RecordNotFound(tree))
    }

    async fn record_where<F>(&self, tree: TreeId, accept: F) -> TlogResult<RecordContent>
    where
        F: Fn(&RecordIndex) -> bool,
    {
        let leaves = self.leaves_all(tree).await?;
        let index = self
            .latest_index(tree, &leaves, accept)?
            .ok_or(TlogError::RecordNotFound(tree))?;
        self.resolve(tree, index)
    }

    fn resolve(&self, tree: TreeId, index: RecordIndex) -> TlogResult<RecordContent> {
        let mut entries = self.entries_get(tree, &index.digests())?;
        let mut take = |key: &Digest| entries.remove(key).ok_or(TlogError::BlobNotFound(*key));

        let record_metadata: RecordMetadata = take(&index.record_metadata)?.decode()?;
        let mut metadata = Vec::with_capacity(index.metadata.len());
        for key in index.metadata.values() {
            metadata.push(take(key)?.decode::<MetadataStream>()?);
        }
        let mut files = Vec::with_capacity(index.files.len());
        for key in index.files.values() {
            files.push(take(key)?.decode::<File>()?);
        }

        Ok(RecordContent {
            index,
            record_metadata,
            metadata,
            files,
        })
    }

    /// Walk record index leaves newest first and return the first one that
    /// `accept`s and whose every digest is a leaf of the tree with a blob in
    /// the store. Invalid indexes are skipped.
    pub(crate) fn latest_index<F>(
        &self,
        tree: TreeId,
        leaves: &[LogLeaf],
        accept: F,
    ) -> TlogResult<Option<RecordIndex>>
    where
        F: Fn(&RecordIndex) -> bool,
    {
        let in_tree: HashSet<Digest> = leaves.iter().map(|l| l.merkle_leaf_hash).collect();

        for leaf in leaves.iter().rev() {
            let Ok(extra) = ExtraData::decode(&leaf.extra_data) else {
                continue;
            };
            if extra.kind() != LeafKind::RecordIndex {
                continue;
            }

            let index: RecordIndex = match self.entry_get(tree, &extra.key) {
                Ok(Some(entry)) => match entry.decode() {
                    Ok(index) => index,
                    Err(e) => {
                        warn!(tree_id = %tree, leaf = leaf.index, error = %e, "undecodable record index skipped");
                        continue;
                    }
                },
                Ok(None) => {
                    warn!(tree_id = %tree, leaf = leaf.index, "record index blob missing");
                    continue;
                }
                Err(e) => {
                    warn!(tree_id = %tree, leaf = leaf.index, error = %e, "record index blob unreadable");
                    continue;
                }
            };
            if !accept(&index) {
                continue;
            }

            let digests: HashSet<Digest> = index.digests().into_iter().collect();
            if let Some(missing) = digests.iter().find(|d| !in_tree.contains(d)) {
                warn!(tree_id = %tree, leaf = leaf.index, digest = %missing, "record index references a digest outside the tree");
                continue;
            }
            let keys: Vec<Digest> = digests.into_iter().collect();
            let present = self.store.get(&keys)?;
            if present.len() != keys.len() {
                warn!(
                    tree_id = %tree,
                    leaf = leaf.index,
                    missing = keys.len() - present.len(),
                    "record index references missing blobs"
                );
                continue;
            }

            debug!(tree_id = %tree, leaf = leaf.index, version = index.version, iteration = index.iteration, "record index resolved");
            return Ok(Some(index));
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Blobs
    // ------------------------------------------------------------------

    /// Fetch blobs by key. Every key must be a leaf of `tree` with a blob.
    pub async fn blobs_get(
        &self,
        tree: TreeId,
        keys: &[Digest],
    ) -> TlogResult<HashMap<Digest, BlobEntry>> {
        let leaves = self.leaves_all(tree).await?;
        let in_tree: HashSet<Digest> = leaves.iter().map(|l| l.merkle_leaf_hash).collect();
        if let Some(missing) = keys.iter().find(|k| !in_tree.contains(k)) {
            return Err(TlogError::BlobNotFound(*missing));
        }
        let entries = self.entries_get(tree, keys)?;
        if let Some(missing) = keys.iter().find(|k| !entries.contains_key(k)) {
            return Err(TlogError::BlobNotFound(*missing));
        }
        Ok(entries)
    }

    /// Save plugin data. Descriptors must not be reserved and the tree must
    /// not be frozen. Returns the key of every entry, in order.
    pub async fn blobs_save(&self, tree: TreeId, entries: Vec<BlobEntry>) -> TlogResult<Vec<Digest>> {
        let mut staged = Vec::with_capacity(entries.len());
        let mut inputs = Vec::with_capacity(entries.len());
        for entry in &entries {
            let desc = entry.descriptor()?.descriptor;
            if is_reserved_descriptor(&desc) {
                return Err(TlogError::ReservedDescriptor(desc));
            }
            staged.push(self.seal(entry)?);
            inputs.push(leaf_input(&desc, entry));
        }

        let _guard = self.lock_tree(tree).await;
        let leaves = self.leaves_all(tree).await?;
        if self
            .latest_index(tree, &leaves, |_| true)?
            .is_some_and(|index| index.frozen)
        {
            return Err(TlogError::TreeFrozen(tree));
        }

        self.store.put(&staged)?;
        let result = self.append_batch(tree, inputs, leaves.len()).await?;
        check_rejected(tree, &result)?;

        debug!(tlog = %self.name, tree_id = %tree, blobs = entries.len(), "plugin blobs saved");
        Ok(entries.iter().map(BlobEntry::key).collect())
    }

    /// Every blob of `tree` written under `desc`, in leaf order.
    pub async fn blobs_by_descriptor(&self, tree: TreeId, desc: &str) -> TlogResult<Vec<BlobEntry>> {
        let leaves = self.leaves_all(tree).await?;
        let keys: Vec<Digest> = leaves
            .iter()
            .filter_map(|l| ExtraData::decode(&l.extra_data).ok())
            .filter(|extra| extra.descriptor == desc)
            .map(|extra| extra.key)
            .collect();
        let entries = self.entries_get(tree, &keys)?;
        keys.iter()
            .map(|k| entries.get(k).cloned().ok_or(TlogError::BlobNotFound(*k)))
            .collect()
    }

    pub(crate) fn entry_get(&self, tree: TreeId, key: &Digest) -> TlogResult<Option<BlobEntry>> {
        Ok(self.entries_get(tree, std::slice::from_ref(key))?.remove(key))
    }

    /// Read and open blobs. Keys without a blob are left out.
    pub(crate) fn entries_get(
        &self,
        tree: TreeId,
        keys: &[Digest],
    ) -> TlogResult<HashMap<Digest, BlobEntry>> {
        let blobs = self.store.get(keys)?;
        let mut entries = HashMap::with_capacity(blobs.len());
        for (key, data) in blobs {
            let entry = self.unseal(&data)?;
            if entry.key() != key {
                return Err(TlogError::Corrupt {
                    tree,
                    reason: format!("blob {} holds content {}", key.short_hex(), entry.key().short_hex()),
                });
            }
            entries.insert(key, entry);
        }
        Ok(entries)
    }

    fn seal(&self, entry: &BlobEntry) -> TlogResult<StagedBlob> {
        let bytes = entry.to_bytes()?;
        let data = match &self.encryption_key {
            Some(key) => key.encrypt(ENCRYPTION_KEY_VERSION, &bytes)?,
            None => bytes,
        };
        Ok(StagedBlob::new(entry.digest, data))
    }

    fn unseal(&self, data: &[u8]) -> TlogResult<BlobEntry> {
        if EncryptionKey::is_encrypted(data) {
            let key = self
                .encryption_key
                .as_ref()
                .ok_or(TlogError::MissingEncryptionKey)?;
            let (plain, _version) = key.decrypt(data)?;
            Ok(BlobEntry::from_bytes(&plain)?)
        } else {
            Ok(BlobEntry::from_bytes(data)?)
        }
    }

    // ------------------------------------------------------------------
    // Anchors
    // ------------------------------------------------------------------

    /// Whether `tree` has leaves appended since its last anchor.
    pub async fn anchor_pending(&self, guard: &TreeGuard) -> TlogResult<bool> {
        let leaves = self.leaves_all(guard.tree()).await?;
        Ok(match leaves.last() {
            None => false,
            Some(leaf) => ExtraData::decode(&leaf.extra_data)
                .map(|extra| extra.kind() != LeafKind::Anchor)
                .unwrap_or(true),
        })
    }

    /// The current signed root of a locked tree, checked against the log's
    /// public key.
    pub async fn signed_log_root(&self, guard: &TreeGuard) -> TlogResult<(SignedLogRoot, LogRoot)> {
        let tree = guard.tree();
        let signed = self
            .retry
            .run("signed_log_root", || self.log.signed_log_root(tree))
            .await?;
        let root = signed.verify(&self.log.public_key())?;
        Ok((signed, root))
    }

    /// Write an anchor's blob. Nothing is appended yet.
    pub fn anchor_stage(&self, anchor: &Anchor) -> TlogResult<StagedAnchor> {
        let entry = BlobEntry::from_json(descriptor::ANCHOR, anchor)?;
        self.store.put(&[self.seal(&entry)?])?;
        Ok(StagedAnchor {
            tree: anchor.tree_id,
            entry,
        })
    }

    /// Append a staged anchor's leaf. Allowed on frozen trees.
    pub async fn anchor_append(&self, guard: &TreeGuard, staged: StagedAnchor) -> TlogResult<Digest> {
        let tree = guard.tree();
        if staged.tree != tree {
            return Err(TlogError::Corrupt {
                tree,
                reason: format!("anchor staged for tree {}", staged.tree),
            });
        }
        let size_before = self.leaves_all(tree).await?.len();
        let input = leaf_input(descriptor::ANCHOR, &staged.entry);
        let result = self.append_batch(tree, vec![input], size_before).await?;
        check_rejected(tree, &result)?;
        let key = staged.entry.key();
        info!(tlog = %self.name, tree_id = %tree, anchor = %key.short_hex(), "anchor appended");
        Ok(key)
    }

    /// The most recent anchor of `tree`, if any.
    pub async fn anchor_latest(&self, tree: TreeId) -> TlogResult<Option<Anchor>> {
        let leaves = self.leaves_all(tree).await?;
        let key = leaves
            .iter()
            .rev()
            .filter_map(|l| ExtraData::decode(&l.extra_data).ok())
            .find(|extra| extra.kind() == LeafKind::Anchor)
            .map(|extra| extra.key);
        match key {
            None => Ok(None),
            Some(key) => {
                let entry = self.entry_get(tree, &key)?.ok_or(TlogError::BlobNotFound(key))?;
                Ok(Some(entry.decode()?))
            }
        }
    }
}

fn leaf_input(desc: &str, entry: &BlobEntry) -> LeafInput {
    LeafInput::new(
        entry.digest.as_bytes().to_vec(),
        ExtraData::new(desc, entry.key()).encode(),
    )
}

fn check_rejected(tree: TreeId, result: &AppendResult) -> TlogResult<()> {
    let rejected: Vec<&QueuedLeafProof> = result.rejected().collect();
    if rejected.is_empty() {
        return Ok(());
    }
    for proof in &rejected {
        if let LeafStatus::Rejected(reason) = &proof.status {
            warn!(tree_id = %tree, leaf = %proof.leaf.merkle_leaf_hash.short_hex(), reason, "leaf rejected");
        }
    }
    Err(TlogError::AppendRejected {
        tree,
        rejected: rejected.len(),
    })
}

/// Rebuild an append result when the tree's tail already holds exactly the
/// submitted batch.
fn reconcile(current: &[LogLeaf], size_before: usize, inputs: &[LeafInput]) -> Option<AppendResult> {
    let tail = current.get(size_before..size_before + inputs.len())?;
    let committed = tail
        .iter()
        .zip(inputs)
        .all(|(leaf, input)| leaf.value == input.value && leaf.extra_data == input.extra_data);
    if !committed {
        return None;
    }

    let hashes: Vec<Digest> = current.iter().map(|l| l.merkle_leaf_hash).collect();
    let proofs = tail
        .iter()
        .map(|leaf| QueuedLeafProof {
            leaf: leaf.clone(),
            status: LeafStatus::Ok,
            inclusion_proof: LogHasher::inclusion_proof(&hashes, leaf.index as usize)
                .unwrap_or_default(),
        })
        .collect();
    Some(AppendResult {
        proofs,
        root: LogRoot {
            tree_size: current.len() as u64,
            root_hash: LogHasher::root(&hashes),
            timestamp_nanos: 0,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_client::{AppendFault, InMemoryLogClient};
    use tlog_store::InMemoryBlobStore;
    use tlog_types::RecordStatus;

    struct Fixture {
        log: Arc<InMemoryLogClient>,
        store: Arc<InMemoryBlobStore>,
        tlog: Tlog,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay_ms: 1,
            timeout_ms: 1_000,
        }
    }

    fn make_fixture(encrypted: bool) -> Fixture {
        make_fixture_with(encrypted, fast_retry())
    }

    fn make_fixture_with(encrypted: bool, retry: RetryPolicy) -> Fixture {
        let log = Arc::new(InMemoryLogClient::new());
        let store = Arc::new(InMemoryBlobStore::new());
        let key = encrypted.then(|| Arc::new(EncryptionKey::generate().0));
        let tlog = Tlog::new(
            "unvetted",
            log.clone() as Arc<dyn LogClient>,
            store.clone() as Arc<dyn BlobStore>,
            key,
            retry,
        );
        Fixture { log, store, tlog }
    }

    fn make_rm(tree: TreeId, version: u32, iteration: u32) -> RecordMetadata {
        RecordMetadata {
            token: tlog_types::Token::from_tree_id(tree),
            version,
            iteration,
            status: RecordStatus::NotReviewed,
            merkle: Digest::null(),
            timestamp: 1_700_000_000,
        }
    }

    fn make_file(name: &str, body: &str) -> File {
        File::from_bytes(name, "text/plain; charset=utf-8", body.as_bytes())
    }

    async fn save_v1(fx: &Fixture) -> (TreeId, RecordIndex) {
        let tree = fx.tlog.tree_new().await.unwrap();
        let index = fx
            .tlog
            .record_save(
                tree,
                make_rm(tree, 1, 1),
                vec![MetadataStream::new(1, "{\"u\":1}")],
                vec![make_file("index.md", "moo")],
            )
            .await
            .unwrap();
        (tree, index)
    }

    fn kinds(leaves: &[LogLeaf]) -> Vec<LeafKind> {
        leaves
            .iter()
            .map(|l| ExtraData::decode(&l.extra_data).unwrap().kind())
            .collect()
    }

    // ----------------------------------------------------------------
    // Saves and reads
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn save_appends_content_then_index() {
        let fx = make_fixture(false);
        let (tree, index) = save_v1(&fx).await;

        let leaves = fx.tlog.leaves_all(tree).await.unwrap();
        assert_eq!(
            kinds(&leaves),
            vec![
                LeafKind::RecordContent,
                LeafKind::RecordContent,
                LeafKind::RecordContent,
                LeafKind::RecordIndex
            ]
        );
        assert_eq!(index.version, 1);
        assert_eq!(index.digests().len(), 3);
        for leaf in &leaves {
            assert!(fx.store.get(&[leaf.merkle_leaf_hash]).unwrap().len() == 1);
        }
    }

    #[tokio::test]
    async fn latest_returns_saved_content() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;

        let content = fx.tlog.record_latest(tree).await.unwrap();
        assert_eq!(content.record_metadata.version, 1);
        assert_eq!(content.metadata, vec![MetadataStream::new(1, "{\"u\":1}")]);
        assert_eq!(content.files, vec![make_file("index.md", "moo")]);
    }

    #[tokio::test]
    async fn unchanged_content_is_not_appended_twice() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;
        let before = fx.log.leaf_count(tree).unwrap();

        fx.tlog
            .record_save(
                tree,
                make_rm(tree, 1, 2),
                vec![MetadataStream::new(1, "{\"u\":1}")],
                vec![make_file("index.md", "moo")],
            )
            .await
            .unwrap();

        // New record metadata plus the new index.
        assert_eq!(fx.log.leaf_count(tree).unwrap(), before + 2);
    }

    #[tokio::test]
    async fn version_lookup_returns_latest_iteration() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;
        fx.tlog
            .record_save(tree, make_rm(tree, 1, 2), vec![], vec![make_file("index.md", "moo")])
            .await
            .unwrap();
        fx.tlog
            .record_save(tree, make_rm(tree, 2, 3), vec![], vec![make_file("index.md", "moo2")])
            .await
            .unwrap();

        let v1 = fx.tlog.record_version(tree, 1).await.unwrap();
        assert_eq!(v1.record_metadata.iteration, 2);
        assert_eq!(v1.files[0].decode_payload().unwrap(), b"moo");

        let latest = fx.tlog.record_latest(tree).await.unwrap();
        assert_eq!(latest.record_metadata.version, 2);

        assert!(matches!(
            fx.tlog.record_version(tree, 9).await,
            Err(TlogError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_tree_has_no_record() {
        let fx = make_fixture(false);
        let tree = fx.tlog.tree_new().await.unwrap();
        assert!(matches!(
            fx.tlog.record_latest(tree).await,
            Err(TlogError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_tree_is_not_found() {
        let fx = make_fixture(false);
        assert!(matches!(
            fx.tlog.record_latest(TreeId(4242)).await,
            Err(TlogError::TreeNotFound(_))
        ));
        assert!(!fx.tlog.tree_exists(TreeId(4242)).await.unwrap());
    }

    #[tokio::test]
    async fn index_with_missing_blob_is_skipped() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;
        let v2 = fx
            .tlog
            .record_save(tree, make_rm(tree, 2, 2), vec![], vec![make_file("index.md", "new")])
            .await
            .unwrap();

        fx.store.del(&[v2.files["index.md"]]).unwrap();

        let latest = fx.tlog.record_latest(tree).await.unwrap();
        assert_eq!(latest.record_metadata.version, 1);
    }

    // ----------------------------------------------------------------
    // Failures
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn rejected_index_leaves_orphans_and_keeps_prior_state() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;
        let before = fx.log.leaf_count(tree).unwrap();

        fx.log.inject_append_fault(AppendFault::RejectLast);
        let err = fx
            .tlog
            .record_save(tree, make_rm(tree, 2, 2), vec![], vec![make_file("index.md", "v2")])
            .await
            .unwrap_err();
        assert!(matches!(err, TlogError::AppendRejected { rejected: 1, .. }));

        // Record metadata and file committed, index did not.
        assert_eq!(fx.log.leaf_count(tree).unwrap(), before + 2);
        let latest = fx.tlog.record_latest(tree).await.unwrap();
        assert_eq!(latest.record_metadata.version, 1);
    }

    #[tokio::test]
    async fn committed_timeout_is_reconciled_without_duplicates() {
        let fx = make_fixture(false);
        let tree = fx.tlog.tree_new().await.unwrap();

        fx.log.inject_append_fault(AppendFault::TimeoutAfterCommit);
        fx.tlog
            .record_save(tree, make_rm(tree, 1, 1), vec![], vec![make_file("index.md", "moo")])
            .await
            .unwrap();

        assert_eq!(fx.log.leaf_count(tree).unwrap(), 3);
        assert_eq!(fx.tlog.record_latest(tree).await.unwrap().index.version, 1);
    }

    #[tokio::test]
    async fn committed_timeout_on_last_attempt_is_reconciled() {
        let fx = make_fixture_with(
            false,
            RetryPolicy {
                attempts: 1,
                ..fast_retry()
            },
        );
        let tree = fx.tlog.tree_new().await.unwrap();

        fx.log.inject_append_fault(AppendFault::TimeoutAfterCommit);
        let index = fx
            .tlog
            .record_save(tree, make_rm(tree, 1, 1), vec![], vec![make_file("index.md", "moo")])
            .await
            .unwrap();
        assert_eq!(index.version, 1);
        assert_eq!(fx.log.leaf_count(tree).unwrap(), 3);
        assert_eq!(fx.tlog.record_latest(tree).await.unwrap().index, index);
    }

    #[tokio::test]
    async fn uncommitted_failure_on_last_attempt_is_reported() {
        let fx = make_fixture_with(
            false,
            RetryPolicy {
                attempts: 1,
                ..fast_retry()
            },
        );
        let tree = fx.tlog.tree_new().await.unwrap();

        fx.log.inject_append_fault(AppendFault::Unavailable);
        let err = fx
            .tlog
            .record_save(tree, make_rm(tree, 1, 1), vec![], vec![make_file("index.md", "moo")])
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(fx.log.leaf_count(tree).unwrap(), 0);
    }

    #[tokio::test]
    async fn unavailable_log_is_retried() {
        let fx = make_fixture(false);
        let tree = fx.tlog.tree_new().await.unwrap();

        fx.log.inject_append_fault(AppendFault::Unavailable);
        fx.tlog
            .record_save(tree, make_rm(tree, 1, 1), vec![], vec![make_file("index.md", "moo")])
            .await
            .unwrap();
        assert_eq!(fx.log.leaf_count(tree).unwrap(), 3);
    }

    // ----------------------------------------------------------------
    // Encryption
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn encrypted_tlog_seals_every_blob() {
        let fx = make_fixture(true);
        let (tree, _) = save_v1(&fx).await;

        let keys: Vec<Digest> = fx.store.all_keys();
        assert!(!keys.is_empty());
        for (_, data) in fx.store.get(&keys).unwrap() {
            assert!(EncryptionKey::is_encrypted(&data));
            assert!(!String::from_utf8_lossy(&data).contains("index.md"));
        }

        let content = fx.tlog.record_latest(tree).await.unwrap();
        assert_eq!(content.files[0].name, "index.md");
    }

    // ----------------------------------------------------------------
    // Freeze and plugin blobs
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn frozen_tree_refuses_saves_and_plugin_writes() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;

        let frozen = fx.tlog.freeze(tree, TreeId(77)).await.unwrap();
        assert!(frozen.frozen);
        assert_eq!(frozen.tree_pointer, TreeId(77));

        let leaves = fx.tlog.leaves_all(tree).await.unwrap();
        assert_eq!(kinds(&leaves).last(), Some(&LeafKind::FreezeRecord));

        assert!(matches!(
            fx.tlog
                .record_save(tree, make_rm(tree, 2, 2), vec![], vec![make_file("a", "b")])
                .await,
            Err(TlogError::TreeFrozen(_))
        ));
        let entry = BlobEntry::from_json("comments:new", &1u8).unwrap();
        assert!(matches!(
            fx.tlog.blobs_save(tree, vec![entry]).await,
            Err(TlogError::TreeFrozen(_))
        ));
        assert!(matches!(
            fx.tlog.freeze(tree, TreeId(78)).await,
            Err(TlogError::TreeFrozen(_))
        ));

        let latest = fx.tlog.record_index_latest(tree).await.unwrap();
        assert_eq!(latest.tree_pointer, TreeId(77));
    }

    #[tokio::test]
    async fn plugin_blobs_roundtrip_by_descriptor() {
        let fx = make_fixture(true);
        let (tree, _) = save_v1(&fx).await;

        let a = BlobEntry::from_json("comments:new", &"a").unwrap();
        let b = BlobEntry::from_json("comments:new", &"b").unwrap();
        let other = BlobEntry::from_json("comments:vote", &"v").unwrap();
        let keys = fx
            .tlog
            .blobs_save(tree, vec![a.clone(), other, b.clone()])
            .await
            .unwrap();
        assert_eq!(keys.len(), 3);

        let found = fx.tlog.blobs_by_descriptor(tree, "comments:new").await.unwrap();
        assert_eq!(found, vec![a.clone(), b]);

        let got = fx.tlog.blobs_get(tree, &[keys[0]]).await.unwrap();
        assert_eq!(got[&keys[0]], a);
    }

    #[tokio::test]
    async fn plugins_cannot_use_reserved_descriptors() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;
        let entry = BlobEntry::from_json(descriptor::RECORD_INDEX, &1u8).unwrap();
        assert!(matches!(
            fx.tlog.blobs_save(tree, vec![entry]).await,
            Err(TlogError::ReservedDescriptor(_))
        ));
    }

    #[tokio::test]
    async fn blobs_get_requires_tree_membership() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;
        let (other, other_index) = save_v1(&fx).await;
        assert_ne!(tree, other);

        // Content shared across trees is stored once, but a key is only
        // readable through a tree that holds its leaf.
        let foreign = Digest::of(b"not a leaf");
        assert!(matches!(
            fx.tlog.blobs_get(tree, &[foreign]).await,
            Err(TlogError::BlobNotFound(_))
        ));
        assert!(fx
            .tlog
            .blobs_get(other, &[other_index.record_metadata])
            .await
            .is_ok());
    }

    // ----------------------------------------------------------------
    // Concurrency
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn concurrent_saves_keep_indices_consecutive() {
        let fx = make_fixture(false);
        let tree = fx.tlog.tree_new().await.unwrap();
        let tlog = Arc::new(fx.tlog);

        let mut handles = Vec::new();
        for i in 1..=8u32 {
            let tlog = Arc::clone(&tlog);
            handles.push(tokio::spawn(async move {
                tlog.record_save(
                    tree,
                    make_rm(tree, i, i),
                    vec![],
                    vec![make_file("index.md", &format!("body {i}"))],
                )
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let leaves = tlog.leaves_all(tree).await.unwrap();
        assert_eq!(leaves.len(), 8 * 3);
        for (i, leaf) in leaves.iter().enumerate() {
            assert_eq!(leaf.index, i as i64);
        }
        // Every index sits right after its own content.
        for chunk in kinds(&leaves).chunks(3) {
            assert_eq!(chunk[2], LeafKind::RecordIndex);
        }
    }

    // ----------------------------------------------------------------
    // Anchors
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn anchor_clears_pending_and_is_allowed_on_frozen_trees() {
        let fx = make_fixture(false);
        let (tree, _) = save_v1(&fx).await;
        fx.tlog.freeze(tree, TreeId(5)).await.unwrap();

        let guard = fx.tlog.lock_tree(tree).await;
        assert!(fx.tlog.anchor_pending(&guard).await.unwrap());
        let (signed, root) = fx.tlog.signed_log_root(&guard).await.unwrap();

        let anchor = Anchor {
            tree_id: tree,
            log_root: signed.log_root.clone(),
            verify_digest: tlog_client::VerifyDigest {
                digest: root.root_hash,
                result: tlog_client::VerifyResult::Ok,
                server_timestamp: 1,
                chain_information: tlog_client::ChainInformation {
                    transaction: "tx".into(),
                    merkle_root: root.root_hash,
                    chain_timestamp: 2,
                },
            },
        };
        let staged = fx.tlog.anchor_stage(&anchor).unwrap();
        fx.tlog.anchor_append(&guard, staged).await.unwrap();
        assert!(!fx.tlog.anchor_pending(&guard).await.unwrap());
        drop(guard);

        assert_eq!(fx.tlog.anchor_latest(tree).await.unwrap(), Some(anchor));
    }
}
