//! The backend facade: record lifecycle over an unvetted and a vetted
//! trust log.
//!
//! A record starts life in its own unvetted tree. Its token is derived from
//! that tree's id and never changes. Making the record public graduates it:
//! the live content is re-appended to a fresh vetted tree, and the unvetted
//! tree is frozen with a pointer to its successor.

mod plugins;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tlog_client::{LogClient, RetryPolicy};
use tlog_crypto::{EncryptionKey, MerkleTree, SigningKey, VerifyingKey};
use tlog_engine::{RecordContent, Tlog, TlogError, TreeGuard, TreeReport};
use tlog_plugin::{
    challenge_response, decode_challenge, Plugin, PluginCommand, PluginCommandReply, PluginInfo,
    PluginRegistry,
};
use tlog_store::BlobStore;
use tlog_types::{
    apply_file_changes, verify_content, verify_files, CensorshipRecord, ContentError,
    ContentErrorCode, Digest, File, MetadataOps, MetadataStream, Record, RecordMetadata,
    RecordState, RecordStatus, Token, TreeId,
};
use tracing::{debug, info, warn};

use crate::error::{BackendError, BackendResult};
use crate::inventory::Inventory;

/// Log client and blob store of one record category.
pub struct TlogParts {
    pub log: Arc<dyn LogClient>,
    pub store: Arc<dyn BlobStore>,
}

#[derive(Default)]
struct State {
    inventory: Inventory,
    /// Token -> vetted tree, for graduated records.
    vetted_trees: HashMap<Token, TreeId>,
}

pub struct TrustLogBackend {
    unvetted: Arc<Tlog>,
    vetted: Arc<Tlog>,
    identity: Arc<SigningKey>,
    encryption_key: Arc<EncryptionKey>,
    state: RwLock<State>,
    plugins: PluginRegistry,
    closed: AtomicBool,
}

impl std::fmt::Debug for TrustLogBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("TrustLogBackend")
            .field("records", &state.inventory.len())
            .field("plugins", &self.plugins.inventory().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Classical merkle root over file digests, taken in file name order.
pub fn merkle_root(files: &[File]) -> BackendResult<Digest> {
    let mut sorted: Vec<&File> = files.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let digests = sorted
        .iter()
        .map(|f| {
            Digest::from_hex(&f.digest).map_err(|_| {
                ContentError::with_context(ContentErrorCode::InvalidFileDigest, f.name.clone())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MerkleTree::root_of(&digests))
}

/// Map a missing tree or record to a not-found result for `token`.
fn not_found(token: Token) -> impl FnOnce(TlogError) -> BackendError {
    move |e| match e {
        TlogError::TreeNotFound(_) | TlogError::RecordNotFound(_) => {
            BackendError::RecordNotFound(token)
        }
        other => BackendError::Tlog(other),
    }
}

fn record_locked(status: RecordStatus) -> BackendError {
    ContentError::with_context(ContentErrorCode::RecordLocked, format!("record is {status}")).into()
}

impl TrustLogBackend {
    /// Build a backend. Unvetted blobs are sealed with `encryption_key`;
    /// vetted blobs are stored in the clear.
    pub fn new(
        unvetted: TlogParts,
        vetted: TlogParts,
        encryption_key: Arc<EncryptionKey>,
        identity: Arc<SigningKey>,
        retry: RetryPolicy,
    ) -> Self {
        let unvetted = Tlog::new(
            "unvetted",
            unvetted.log,
            unvetted.store,
            Some(Arc::clone(&encryption_key)),
            retry.clone(),
        );
        let vetted = Tlog::new("vetted", vetted.log, vetted.store, None, retry);
        Self {
            unvetted: Arc::new(unvetted),
            vetted: Arc::new(vetted),
            identity,
            encryption_key,
            state: RwLock::new(State::default()),
            plugins: PluginRegistry::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Both trust logs, unvetted first. The anchor scheduler runs over these.
    pub fn tlogs(&self) -> Vec<Arc<Tlog>> {
        vec![Arc::clone(&self.unvetted), Arc::clone(&self.vetted)]
    }

    /// Key that signs censorship records and command replies.
    pub fn identity_public_key(&self) -> VerifyingKey {
        self.identity.verifying_key()
    }

    pub fn identity(&self) -> Arc<SigningKey> {
        Arc::clone(&self.identity)
    }

    fn tlog(&self, state: RecordState) -> &Tlog {
        match state {
            RecordState::Unvetted => &self.unvetted,
            RecordState::Vetted => &self.vetted,
        }
    }

    fn check_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    /// Tree currently holding `token` in `state`.
    fn locate(&self, state: RecordState, token: &Token) -> BackendResult<TreeId> {
        let guard = self.state.read().expect("lock poisoned");
        let tree = match state {
            RecordState::Unvetted => guard
                .inventory
                .contains(RecordState::Unvetted, token)
                .then_some(token.tree_id()),
            RecordState::Vetted => guard.vetted_trees.get(token).copied(),
        };
        tree.ok_or(BackendError::RecordNotFound(*token))
    }

    fn censorship_record(&self, token: Token, merkle: Digest) -> CensorshipRecord {
        let message = CensorshipRecord::message(&merkle, &token);
        CensorshipRecord {
            token,
            merkle,
            signature: self.identity.sign(message.as_bytes()).to_hex(),
        }
    }

    fn assemble(
        &self,
        state: RecordState,
        record_metadata: RecordMetadata,
        metadata: Vec<MetadataStream>,
        files: Vec<File>,
    ) -> Record {
        Record {
            state,
            censorship_record: self.censorship_record(record_metadata.token, record_metadata.merkle),
            record_metadata,
            metadata,
            files,
        }
    }

    fn set_inventory(&self, state: RecordState, token: Token, status: RecordStatus) {
        self.state
            .write()
            .expect("lock poisoned")
            .inventory
            .set(state, token, status);
    }

    // ------------------------------------------------------------------
    // New records
    // ------------------------------------------------------------------

    /// Submit a new unvetted record.
    pub async fn new_record(
        &self,
        metadata: Vec<MetadataStream>,
        files: Vec<File>,
    ) -> BackendResult<CensorshipRecord> {
        self.check_open()?;
        verify_content(&metadata, &files, true)?;
        let merkle = merkle_root(&files)?;

        let tree = self.unvetted.tree_new().await?;
        let token = Token::from_tree_id(tree);
        let record_metadata = RecordMetadata {
            token,
            version: 1,
            iteration: 1,
            status: RecordStatus::NotReviewed,
            merkle,
            timestamp: now(),
        };
        self.unvetted
            .record_save(tree, record_metadata, metadata, files)
            .await?;
        self.set_inventory(RecordState::Unvetted, token, RecordStatus::NotReviewed);

        info!(token = %token, tree_id = %tree, merkle = %merkle.short_hex(), "record created");
        Ok(self.censorship_record(token, merkle))
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    pub async fn update_unvetted(
        &self,
        token: Token,
        metadata: &MetadataOps,
        files_add: Vec<File>,
        files_del: Vec<String>,
    ) -> BackendResult<Record> {
        self.update_record(RecordState::Unvetted, token, metadata, files_add, files_del)
            .await
    }

    pub async fn update_vetted(
        &self,
        token: Token,
        metadata: &MetadataOps,
        files_add: Vec<File>,
        files_del: Vec<String>,
    ) -> BackendResult<Record> {
        self.update_record(RecordState::Vetted, token, metadata, files_add, files_del)
            .await
    }

    /// Edit metadata streams only. Bumps the iteration, never the version.
    pub async fn update_unvetted_metadata(
        &self,
        token: Token,
        metadata: &MetadataOps,
    ) -> BackendResult<Record> {
        self.update_record(RecordState::Unvetted, token, metadata, Vec::new(), Vec::new())
            .await
    }

    pub async fn update_vetted_metadata(
        &self,
        token: Token,
        metadata: &MetadataOps,
    ) -> BackendResult<Record> {
        self.update_record(RecordState::Vetted, token, metadata, Vec::new(), Vec::new())
            .await
    }

    /// A record accepts content changes while it is not frozen and its
    /// status belongs to `state`.
    fn check_writable(state: RecordState, current: &RecordContent) -> BackendResult<()> {
        let status = current.record_metadata.status;
        let open = match state {
            RecordState::Unvetted => status.is_unvetted(),
            RecordState::Vetted => status == RecordStatus::Public,
        };
        if current.index.frozen || !open {
            return Err(record_locked(status));
        }
        Ok(())
    }

    async fn update_record(
        &self,
        state: RecordState,
        token: Token,
        ops: &MetadataOps,
        files_add: Vec<File>,
        files_del: Vec<String>,
    ) -> BackendResult<Record> {
        self.check_open()?;
        ops.verify()?;
        verify_files(&files_add)?;

        let tree = self.locate(state, &token)?;
        let tlog = self.tlog(state);
        let guard = tlog.lock_tree(tree).await;
        let current = tlog.record_latest(tree).await.map_err(not_found(token))?;
        Self::check_writable(state, &current)?;

        let files = apply_file_changes(&current.files, &files_add, &files_del)?;
        let metadata = ops.apply(&current.metadata);
        let files_changed = files != current.files;
        if !files_changed && metadata == current.metadata {
            return Err(ContentError::new(ContentErrorCode::NoChanges).into());
        }
        if files.is_empty() {
            return Err(ContentError::new(ContentErrorCode::Empty).into());
        }

        let mut record_metadata = current.record_metadata;
        record_metadata.iteration += 1;
        record_metadata.timestamp = now();
        if files_changed {
            record_metadata.version += 1;
            record_metadata.merkle = merkle_root(&files)?;
            if state == RecordState::Unvetted {
                record_metadata.status = RecordStatus::UnreviewedChanges;
            }
        }

        tlog.record_save_locked(&guard, record_metadata.clone(), metadata.clone(), files.clone())
            .await?;
        self.set_inventory(state, token, record_metadata.status);
        info!(
            token = %token,
            state = %state,
            version = record_metadata.version,
            iteration = record_metadata.iteration,
            "record updated"
        );
        Ok(self.assemble(state, record_metadata, metadata, files))
    }

    // ------------------------------------------------------------------
    // Status changes
    // ------------------------------------------------------------------

    /// Change the status of a record in whichever state it is in.
    pub async fn set_status(
        &self,
        token: Token,
        to: RecordStatus,
        metadata: &MetadataOps,
    ) -> BackendResult<Record> {
        let graduated = self
            .state
            .read()
            .expect("lock poisoned")
            .vetted_trees
            .contains_key(&token);
        if graduated {
            self.set_vetted_status(token, to, metadata).await
        } else {
            self.set_unvetted_status(token, to, metadata).await
        }
    }

    /// Censor an unvetted record, or make it public by graduating it to
    /// the vetted log.
    pub async fn set_unvetted_status(
        &self,
        token: Token,
        to: RecordStatus,
        ops: &MetadataOps,
    ) -> BackendResult<Record> {
        self.check_open()?;
        ops.verify()?;

        let tree = match self.locate(RecordState::Unvetted, &token) {
            Ok(tree) => tree,
            Err(BackendError::RecordNotFound(_)) if self.vetted_exists(&token) => {
                return Err(BackendError::StatusChangeInvalid {
                    from: RecordStatus::Public,
                    to,
                });
            }
            Err(e) => return Err(e),
        };
        let guard = self.unvetted.lock_tree(tree).await;
        let current = self
            .unvetted
            .record_latest(tree)
            .await
            .map_err(not_found(token))?;

        // Re-checked under the lock: a graduation may have finished while
        // this call waited.
        let from = if current.index.tree_pointer.is_none() {
            current.record_metadata.status
        } else {
            RecordStatus::Public
        };
        if current.index.frozen || !from.can_transition(to) {
            return Err(BackendError::StatusChangeInvalid { from, to });
        }

        let metadata = ops.apply(&current.metadata);
        let mut record_metadata = current.record_metadata;
        record_metadata.status = to;
        record_metadata.iteration += 1;
        record_metadata.timestamp = now();

        if to == RecordStatus::Public {
            return self
                .graduate(&guard, record_metadata, metadata, current.files)
                .await;
        }

        self.unvetted
            .record_save_locked(&guard, record_metadata.clone(), metadata.clone(), current.files.clone())
            .await?;
        self.unvetted.freeze_locked(&guard, TreeId::NONE).await?;
        self.set_inventory(RecordState::Unvetted, token, to);
        info!(token = %token, from = %from, to = %to, "unvetted status changed");
        Ok(self.assemble(RecordState::Unvetted, record_metadata, metadata, current.files))
    }

    /// Move a record's live content to a new vetted tree and freeze the
    /// unvetted tree behind it. The caller holds the unvetted tree's lock.
    async fn graduate(
        &self,
        unvetted_guard: &TreeGuard,
        record_metadata: RecordMetadata,
        metadata: Vec<MetadataStream>,
        files: Vec<File>,
    ) -> BackendResult<Record> {
        let token = record_metadata.token;
        let unvetted_tree = unvetted_guard.tree();
        let vetted_tree = self.vetted.tree_new().await?;
        let vetted_guard = self.vetted.lock_tree(vetted_tree).await;

        self.vetted
            .record_save_locked(&vetted_guard, record_metadata.clone(), metadata.clone(), files.clone())
            .await?;
        if let Err(e) = self.unvetted.freeze_locked(unvetted_guard, vetted_tree).await {
            warn!(
                token = %token,
                vetted_tree = %vetted_tree,
                error = %e,
                "vetted copy written but unvetted tree not frozen"
            );
            return Err(e.into());
        }

        {
            let mut state = self.state.write().expect("lock poisoned");
            state.inventory.remove(RecordState::Unvetted, &token);
            state
                .inventory
                .set(RecordState::Vetted, token, RecordStatus::Public);
            state.vetted_trees.insert(token, vetted_tree);
        }
        info!(
            token = %token,
            unvetted_tree = %unvetted_tree,
            vetted_tree = %vetted_tree,
            "record made public"
        );
        Ok(self.assemble(RecordState::Vetted, record_metadata, metadata, files))
    }

    /// Censor or archive a public record. Both are terminal and freeze the
    /// vetted tree.
    pub async fn set_vetted_status(
        &self,
        token: Token,
        to: RecordStatus,
        ops: &MetadataOps,
    ) -> BackendResult<Record> {
        self.check_open()?;
        ops.verify()?;

        let tree = self.locate(RecordState::Vetted, &token)?;
        let guard = self.vetted.lock_tree(tree).await;
        let current = self
            .vetted
            .record_latest(tree)
            .await
            .map_err(not_found(token))?;
        let from = current.record_metadata.status;
        if current.index.frozen || !from.can_transition(to) {
            return Err(BackendError::StatusChangeInvalid { from, to });
        }

        let metadata = ops.apply(&current.metadata);
        let mut record_metadata = current.record_metadata;
        record_metadata.status = to;
        record_metadata.iteration += 1;
        record_metadata.timestamp = now();

        self.vetted
            .record_save_locked(&guard, record_metadata.clone(), metadata.clone(), current.files.clone())
            .await?;
        if to.is_terminal() {
            self.vetted.freeze_locked(&guard, TreeId::NONE).await?;
        }
        self.set_inventory(RecordState::Vetted, token, to);
        info!(token = %token, from = %from, to = %to, "vetted status changed");
        Ok(self.assemble(RecordState::Vetted, record_metadata, metadata, current.files))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The latest unvetted record, or the latest iteration of `version`.
    pub async fn get_unvetted(&self, token: Token, version: Option<u32>) -> BackendResult<Record> {
        self.get(RecordState::Unvetted, token, version).await
    }

    pub async fn get_vetted(&self, token: Token, version: Option<u32>) -> BackendResult<Record> {
        self.get(RecordState::Vetted, token, version).await
    }

    async fn get(
        &self,
        state: RecordState,
        token: Token,
        version: Option<u32>,
    ) -> BackendResult<Record> {
        self.check_open()?;
        let tree = self.locate(state, &token)?;
        let tlog = self.tlog(state);
        let content = match version {
            Some(version) => tlog.record_version(tree, version).await,
            None => tlog.record_latest(tree).await,
        }
        .map_err(not_found(token))?;
        Ok(self.assemble(
            state,
            content.record_metadata,
            content.metadata,
            content.files,
        ))
    }

    pub fn unvetted_exists(&self, token: &Token) -> bool {
        self.locate(RecordState::Unvetted, token).is_ok()
    }

    pub fn vetted_exists(&self, token: &Token) -> bool {
        self.locate(RecordState::Vetted, token).is_ok()
    }

    /// Snapshot of the status inventory.
    pub fn inventory(&self) -> Inventory {
        self.state.read().expect("lock poisoned").inventory.clone()
    }

    /// Inspect the tree holding `token` in `state`.
    pub async fn fsck(&self, state: RecordState, token: Token) -> BackendResult<TreeReport> {
        self.check_open()?;
        let tree = self.locate(state, &token)?;
        Ok(self.tlog(state).fsck(tree).await?)
    }

    /// Rebuild the inventory by replaying the latest record index of every
    /// tree. Returns the number of records found.
    ///
    /// A frozen unvetted tree with a tree pointer maps its token to the
    /// vetted tree it points at. Vetted trees nothing points at are left
    /// over from an interrupted graduation and are skipped.
    pub async fn rebuild_inventory(&self) -> BackendResult<usize> {
        self.check_open()?;
        let mut rebuilt = State::default();
        let mut successors: HashMap<TreeId, Token> = HashMap::new();

        for tree in self.unvetted.trees_all().await? {
            let token = Token::from_tree_id(tree);
            let content = match self.unvetted.record_latest(tree).await {
                Ok(content) => content,
                Err(e) if e.is_not_found() => {
                    warn!(tree_id = %tree, error = %e, "skipping unvetted tree without a record");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if content.index.frozen && !content.index.tree_pointer.is_none() {
                successors.insert(content.index.tree_pointer, token);
            } else {
                rebuilt.inventory.set(
                    RecordState::Unvetted,
                    token,
                    content.record_metadata.status,
                );
            }
        }

        for tree in self.vetted.trees_all().await? {
            let Some(token) = successors.remove(&tree) else {
                warn!(tree_id = %tree, "skipping vetted tree with no unvetted predecessor");
                continue;
            };
            let content = match self.vetted.record_latest(tree).await {
                Ok(content) => content,
                Err(e) if e.is_not_found() => {
                    warn!(tree_id = %tree, token = %token, error = %e, "skipping empty vetted tree");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            rebuilt
                .inventory
                .set(RecordState::Vetted, token, content.record_metadata.status);
            rebuilt.vetted_trees.insert(token, tree);
        }
        for (tree, token) in successors {
            warn!(tree_id = %tree, token = %token, "tree pointer names a missing vetted tree");
        }

        let count = rebuilt.inventory.len();
        *self.state.write().expect("lock poisoned") = rebuilt;
        info!(records = count, "inventory rebuilt");
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Plugins
    // ------------------------------------------------------------------

    /// Register a plugin. Returns `false` when its id is already taken.
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> BackendResult<bool> {
        self.check_open()?;
        Ok(self.plugins.register(plugin))
    }

    pub fn plugin_inventory(&self) -> Vec<PluginInfo> {
        self.plugins.inventory()
    }

    /// Run one plugin command and sign the caller's challenge.
    pub async fn plugin_command(&self, command: PluginCommand) -> BackendResult<PluginCommandReply> {
        self.check_open()?;
        let challenge = decode_challenge(&command.challenge)?;
        let payload = self
            .plugins
            .execute(&command.id, &command.command, &command.payload)
            .await?;
        debug!(
            plugin_id = %command.id,
            command = %command.command,
            command_id = %command.command_id,
            "plugin command replied"
        );
        Ok(PluginCommandReply {
            id: command.id,
            command: command.command,
            command_id: command.command_id,
            payload,
            response: challenge_response(&self.identity, &challenge),
        })
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Zero the encryption key and close both blob stores. Every later
    /// call fails with [`BackendError::Closed`].
    pub fn close(&self) -> BackendResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.encryption_key.zero();
        let unvetted = self.unvetted.close();
        let vetted = self.vetted.close();
        info!("backend closed");
        unvetted?;
        vetted?;
        Ok(())
    }
}
