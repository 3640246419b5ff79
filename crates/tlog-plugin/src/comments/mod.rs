//! Comments and comment votes on records.
//!
//! Every object is stored as a plugin blob in the record's tree and the
//! per-record comment state is rebuilt from those blobs on each command.
//! Writes to one record are serialized; reads are not.

mod index;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tlog_crypto::{Signature, SigningKey, VerifyingKey};
use tlog_engine::TreeLocks;
use tlog_store::BlobEntry;
use tlog_types::{RecordState, Token};
use tracing::info;

use crate::backend::{PluginBackend, RecordRef};
use crate::error::{PluginError, PluginResult};
use crate::plugin::{CommandTable, Plugin, PluginInfo, PluginSetting};

use index::CommentsIndex;
use types::*;

/// Parsed plugin settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentsSettings {
    pub comment_length_max: usize,
    pub vote_changes_max: u32,
}

impl Default for CommentsSettings {
    fn default() -> Self {
        Self {
            comment_length_max: DEFAULT_COMMENT_LENGTH_MAX,
            vote_changes_max: DEFAULT_VOTE_CHANGES_MAX,
        }
    }
}

impl CommentsSettings {
    pub fn from_settings(settings: &[PluginSetting]) -> PluginResult<Self> {
        let mut parsed = Self::default();
        for setting in settings {
            let invalid = |reason: String| PluginError::Setting {
                key: setting.key.clone(),
                reason,
            };
            match setting.key.as_str() {
                SETTING_COMMENT_LENGTH_MAX => {
                    parsed.comment_length_max =
                        setting.value.parse().map_err(|e| invalid(format!("{e}")))?;
                }
                SETTING_VOTE_CHANGES_MAX => {
                    parsed.vote_changes_max =
                        setting.value.parse().map_err(|e| invalid(format!("{e}")))?;
                }
                _ => return Err(invalid("unknown setting".into())),
            }
        }
        Ok(parsed)
    }

    fn to_settings(&self) -> Vec<PluginSetting> {
        vec![
            PluginSetting::new(SETTING_COMMENT_LENGTH_MAX, self.comment_length_max.to_string()),
            PluginSetting::new(SETTING_VOTE_CHANGES_MAX, self.vote_changes_max.to_string()),
        ]
    }
}

pub struct CommentsPlugin {
    backend: Arc<dyn PluginBackend>,
    identity: Arc<SigningKey>,
    settings: CommentsSettings,
    locks: TreeLocks,
}

impl std::fmt::Debug for CommentsPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentsPlugin")
            .field("settings", &self.settings)
            .finish()
    }
}

fn user_error(code: ErrorCode, context: impl Into<String>) -> PluginError {
    PluginError::user(PLUGIN_ID, code.as_i32(), context)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl CommentsPlugin {
    pub fn new(
        backend: Arc<dyn PluginBackend>,
        identity: Arc<SigningKey>,
        settings: &[PluginSetting],
    ) -> PluginResult<Self> {
        Ok(Self {
            backend,
            identity,
            settings: CommentsSettings::from_settings(settings)?,
            locks: TreeLocks::new(),
        })
    }

    pub fn settings(&self) -> &CommentsSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn parse_state(state: u32) -> PluginResult<RecordState> {
        RecordState::from_u32(state).map_err(|_| user_error(ErrorCode::StateInvalid, format!("{state}")))
    }

    fn parse_token(token: &str) -> PluginResult<Token> {
        token
            .parse::<Token>()
            .map_err(|e| user_error(ErrorCode::TokenInvalid, e.to_string()))
    }

    fn verify_signature(public_key: &str, signature: &str, message: &str) -> PluginResult<()> {
        let key = VerifyingKey::from_hex(public_key)
            .map_err(|e| user_error(ErrorCode::PublicKeyInvalid, e.to_string()))?;
        let sig = Signature::from_hex(signature)
            .map_err(|e| user_error(ErrorCode::SignatureInvalid, e.to_string()))?;
        key.verify(message.as_bytes(), &sig)
            .map_err(|e| user_error(ErrorCode::SignatureInvalid, e.to_string()))
    }

    fn verify_text(&self, comment: &str) -> PluginResult<()> {
        if comment.trim().is_empty() {
            return Err(user_error(ErrorCode::CommentTextInvalid, "empty comment"));
        }
        let length = comment.chars().count();
        if length > self.settings.comment_length_max {
            return Err(user_error(
                ErrorCode::CommentTextInvalid,
                format!("length {length} exceeds {}", self.settings.comment_length_max),
            ));
        }
        Ok(())
    }

    async fn record(&self, state: RecordState, token: &Token) -> PluginResult<RecordRef> {
        self.backend
            .record(state, token)
            .await?
            .ok_or_else(|| user_error(ErrorCode::RecordNotFound, token.to_hex()))
    }

    /// Comments are frozen once a record is censored or archived.
    fn writable(record: &RecordRef) -> PluginResult<()> {
        if record.status.is_terminal() {
            return Err(user_error(
                ErrorCode::RecordStateInvalid,
                format!("record is {}", record.status),
            ));
        }
        Ok(())
    }

    fn receipt(&self, client_signature: &str) -> String {
        self.identity.sign(client_signature.as_bytes()).to_hex()
    }

    async fn decode_all<T: DeserializeOwned>(&self, record: &RecordRef, desc: &str) -> PluginResult<Vec<T>> {
        self.backend
            .blobs_by_descriptor(record, desc)
            .await?
            .iter()
            .map(|entry| entry.decode().map_err(PluginError::from))
            .collect()
    }

    async fn load_index(&self, record: &RecordRef) -> PluginResult<CommentsIndex> {
        let adds = self.decode_all(record, descriptor::COMMENT_ADD).await?;
        let dels = self.decode_all(record, descriptor::COMMENT_DEL).await?;
        let votes = self.decode_all(record, descriptor::COMMENT_VOTE).await?;
        Ok(CommentsIndex::build(adds, dels, votes))
    }

    async fn save<T: Serialize>(&self, record: &RecordRef, desc: &str, value: &T) -> PluginResult<()> {
        let entry = BlobEntry::from_json(desc, value)?;
        match self.backend.blobs_save(record, vec![entry]).await {
            Ok(_) => Ok(()),
            // The record changed state after it was resolved.
            Err(PluginError::RecordFrozen(_)) => Err(user_error(
                ErrorCode::RecordStateInvalid,
                format!("record {} is frozen", record.token),
            )),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub async fn cmd_new(self: Arc<Self>, req: New) -> PluginResult<NewReply> {
        let state = Self::parse_state(req.state)?;
        let token = Self::parse_token(&req.token)?;
        let message = format!("{}{}{}{}", req.state, req.token, req.parent_id, req.comment);
        Self::verify_signature(&req.public_key, &req.signature, &message)?;
        self.verify_text(&req.comment)?;

        let record = self.record(state, &token).await?;
        Self::writable(&record)?;

        let _guard = self.locks.lock(token.tree_id()).await;
        let index = self.load_index(&record).await?;
        if req.parent_id != 0 && index.get(req.parent_id).is_none() {
            return Err(user_error(
                ErrorCode::ParentIdInvalid,
                format!("parent {} not found", req.parent_id),
            ));
        }

        let add = CommentAdd {
            user_id: req.user_id,
            state: req.state,
            token: req.token,
            parent_id: req.parent_id,
            comment: req.comment,
            public_key: req.public_key,
            receipt: self.receipt(&req.signature),
            signature: req.signature,
            comment_id: index.next_id(),
            version: 1,
            timestamp: now(),
        };
        self.save(&record, descriptor::COMMENT_ADD, &add).await?;
        info!(token = %token, comment_id = add.comment_id, "comment added");

        let entry = index::CommentEntry::default();
        Ok(NewReply {
            comment: entry.render(&add),
        })
    }

    pub async fn cmd_edit(self: Arc<Self>, req: Edit) -> PluginResult<EditReply> {
        let state = Self::parse_state(req.state)?;
        let token = Self::parse_token(&req.token)?;
        let message = format!(
            "{}{}{}{}{}",
            req.state, req.token, req.parent_id, req.comment_id, req.comment
        );
        Self::verify_signature(&req.public_key, &req.signature, &message)?;
        self.verify_text(&req.comment)?;

        let record = self.record(state, &token).await?;
        Self::writable(&record)?;

        let _guard = self.locks.lock(token.tree_id()).await;
        let index = self.load_index(&record).await?;
        let entry = index
            .get(req.comment_id)
            .filter(|e| !e.is_deleted())
            .ok_or_else(|| user_error(ErrorCode::CommentNotFound, format!("{}", req.comment_id)))?;
        let latest = entry
            .latest()
            .ok_or_else(|| user_error(ErrorCode::CommentNotFound, format!("{}", req.comment_id)))?;

        if latest.user_id != req.user_id {
            return Err(user_error(ErrorCode::UserUnauthorized, "user is not the author"));
        }
        if latest.parent_id != req.parent_id {
            return Err(user_error(
                ErrorCode::ParentIdInvalid,
                format!("comment parent is {}", latest.parent_id),
            ));
        }
        if latest.comment == req.comment {
            return Err(user_error(ErrorCode::CommentTextInvalid, "comment did not change"));
        }

        let add = CommentAdd {
            user_id: req.user_id,
            state: req.state,
            token: req.token,
            parent_id: req.parent_id,
            comment: req.comment,
            public_key: req.public_key,
            receipt: self.receipt(&req.signature),
            signature: req.signature,
            comment_id: req.comment_id,
            version: latest.version + 1,
            timestamp: now(),
        };
        self.save(&record, descriptor::COMMENT_ADD, &add).await?;
        info!(token = %token, comment_id = add.comment_id, version = add.version, "comment edited");

        Ok(EditReply {
            comment: entry.render(&add),
        })
    }

    /// Deletion requires a valid signature; deciding who may delete is left
    /// to the caller.
    pub async fn cmd_del(self: Arc<Self>, req: Del) -> PluginResult<DelReply> {
        let state = Self::parse_state(req.state)?;
        let token = Self::parse_token(&req.token)?;
        let message = format!("{}{}{}{}", req.state, req.token, req.comment_id, req.reason);
        Self::verify_signature(&req.public_key, &req.signature, &message)?;

        let record = self.record(state, &token).await?;
        Self::writable(&record)?;

        let _guard = self.locks.lock(token.tree_id()).await;
        let index = self.load_index(&record).await?;
        let mut entry = index
            .get(req.comment_id)
            .filter(|e| !e.is_deleted())
            .cloned()
            .ok_or_else(|| user_error(ErrorCode::CommentNotFound, format!("{}", req.comment_id)))?;
        let latest = entry
            .latest()
            .cloned()
            .ok_or_else(|| user_error(ErrorCode::CommentNotFound, format!("{}", req.comment_id)))?;

        let del = CommentDel {
            token: req.token,
            state: req.state,
            comment_id: req.comment_id,
            reason: req.reason,
            public_key: req.public_key,
            receipt: self.receipt(&req.signature),
            signature: req.signature,
            parent_id: latest.parent_id,
            author_public_key: latest.public_key.clone(),
            timestamp: now(),
        };
        self.save(&record, descriptor::COMMENT_DEL, &del).await?;
        info!(token = %token, comment_id = del.comment_id, "comment deleted");

        entry.del = Some(del);
        Ok(DelReply {
            comment: entry.render(&latest),
        })
    }

    pub async fn cmd_vote(self: Arc<Self>, req: Vote) -> PluginResult<VoteReply> {
        let state = Self::parse_state(req.state)?;
        let token = Self::parse_token(&req.token)?;
        if req.vote != VOTE_UP && req.vote != VOTE_DOWN {
            return Err(user_error(ErrorCode::VoteInvalid, format!("{}", req.vote)));
        }
        let message = format!("{}{}{}{}", req.state, req.token, req.comment_id, req.vote);
        Self::verify_signature(&req.public_key, &req.signature, &message)?;

        let record = self.record(state, &token).await?;
        Self::writable(&record)?;

        let _guard = self.locks.lock(token.tree_id()).await;
        let index = self.load_index(&record).await?;
        let mut entry = index
            .get(req.comment_id)
            .filter(|e| !e.is_deleted())
            .cloned()
            .ok_or_else(|| user_error(ErrorCode::CommentNotFound, format!("{}", req.comment_id)))?;

        if entry.latest().is_some_and(|c| c.user_id == req.user_id) {
            return Err(user_error(
                ErrorCode::UserUnauthorized,
                "cannot vote on own comment",
            ));
        }
        // A user's first vote is not a change.
        let changes = entry.vote_changes(&req.user_id);
        let has_voted = entry.votes.contains_key(&req.user_id);
        if has_voted && changes >= self.settings.vote_changes_max as usize {
            return Err(user_error(
                ErrorCode::VoteChangesMax,
                format!("{changes} vote changes"),
            ));
        }

        let vote = CommentVote {
            user_id: req.user_id,
            state: req.state,
            token: req.token,
            comment_id: req.comment_id,
            vote: req.vote,
            public_key: req.public_key,
            receipt: self.receipt(&req.signature),
            signature: req.signature,
            timestamp: now(),
        };
        self.save(&record, descriptor::COMMENT_VOTE, &vote).await?;
        info!(token = %token, comment_id = vote.comment_id, vote = vote.vote, "comment vote cast");

        let reply_timestamp = vote.timestamp;
        let receipt = vote.receipt.clone();
        entry
            .votes
            .entry(vote.user_id.clone())
            .or_default()
            .push(vote);
        let (downvotes, upvotes) = entry.score();
        Ok(VoteReply {
            downvotes,
            upvotes,
            timestamp: reply_timestamp,
            receipt,
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    async fn read_index(&self, state: u32, token: &str) -> PluginResult<CommentsIndex> {
        let state = Self::parse_state(state)?;
        let token = Self::parse_token(token)?;
        let record = self.record(state, &token).await?;
        self.load_index(&record).await
    }

    pub async fn cmd_get(self: Arc<Self>, req: Get) -> PluginResult<GetReply> {
        let index = self.read_index(req.state, &req.token).await?;
        let comments = req
            .comment_ids
            .iter()
            .filter_map(|id| index.comment(*id).map(|c| (*id, c)))
            .collect();
        Ok(GetReply { comments })
    }

    pub async fn cmd_get_all(self: Arc<Self>, req: GetAll) -> PluginResult<GetAllReply> {
        let index = self.read_index(req.state, &req.token).await?;
        Ok(GetAllReply {
            comments: index.all(),
        })
    }

    pub async fn cmd_get_version(self: Arc<Self>, req: GetVersion) -> PluginResult<GetVersionReply> {
        let index = self.read_index(req.state, &req.token).await?;
        let comment = index
            .comment_version(req.comment_id, req.version)
            .ok_or_else(|| {
                user_error(
                    ErrorCode::CommentNotFound,
                    format!("{} version {}", req.comment_id, req.version),
                )
            })?;
        Ok(GetVersionReply { comment })
    }

    pub async fn cmd_count(self: Arc<Self>, req: Count) -> PluginResult<CountReply> {
        let index = self.read_index(req.state, &req.token).await?;
        Ok(CountReply {
            count: index.comments.len() as u64,
        })
    }

    pub async fn cmd_votes(self: Arc<Self>, req: Votes) -> PluginResult<VotesReply> {
        let index = self.read_index(req.state, &req.token).await?;
        Ok(VotesReply {
            votes: index.votes_by(&req.user_id),
        })
    }
}

fn bind<Req, Fut, F>(plugin: &Arc<CommentsPlugin>, f: F) -> impl Fn(Req) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<CommentsPlugin>, Req) -> Fut + Send + Sync + 'static,
    Fut: Future,
{
    let plugin = Arc::clone(plugin);
    move |req| f(Arc::clone(&plugin), req)
}

impl Plugin for CommentsPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: PLUGIN_ID.into(),
            version: PLUGIN_VERSION.into(),
            settings: self.settings.to_settings(),
        }
    }

    fn commands(self: Arc<Self>) -> CommandTable {
        CommandTable::new(PLUGIN_ID)
            .typed(cmd::NEW, bind(&self, Self::cmd_new))
            .typed(cmd::EDIT, bind(&self, Self::cmd_edit))
            .typed(cmd::DEL, bind(&self, Self::cmd_del))
            .typed(cmd::VOTE, bind(&self, Self::cmd_vote))
            .typed(cmd::GET, bind(&self, Self::cmd_get))
            .typed(cmd::GET_ALL, bind(&self, Self::cmd_get_all))
            .typed(cmd::GET_VERSION, bind(&self, Self::cmd_get_version))
            .typed(cmd::COUNT, bind(&self, Self::cmd_count))
            .typed(cmd::VOTES, bind(&self, Self::cmd_votes))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tlog_types::{Digest, RecordStatus, TreeId};

    use super::*;
    use crate::registry::PluginRegistry;

    /// Plugin backend over plain maps.
    #[derive(Default)]
    struct MemoryBackend {
        records: Mutex<HashMap<(RecordState, Token), RecordRef>>,
        blobs: Mutex<HashMap<TreeId, Vec<BlobEntry>>>,
        frozen: Mutex<HashSet<TreeId>>,
    }

    impl MemoryBackend {
        fn add_record(&self, state: RecordState, tree: i64, status: RecordStatus) -> Token {
            let token = Token::from_tree_id(TreeId(tree));
            self.records.lock().unwrap().insert(
                (state, token),
                RecordRef {
                    token,
                    state,
                    tree: TreeId(tree),
                    status,
                    version: 1,
                },
            );
            token
        }

        /// Freeze the tree without touching the record status, as a
        /// concurrent graduation does.
        fn freeze(&self, tree: TreeId) {
            self.frozen.lock().unwrap().insert(tree);
        }

        fn set_status(&self, state: RecordState, token: Token, status: RecordStatus) {
            if let Some(r) = self.records.lock().unwrap().get_mut(&(state, token)) {
                r.status = status;
            }
        }
    }

    #[async_trait]
    impl PluginBackend for MemoryBackend {
        async fn record(&self, state: RecordState, token: &Token) -> PluginResult<Option<RecordRef>> {
            Ok(self.records.lock().unwrap().get(&(state, *token)).cloned())
        }

        async fn blobs_save(
            &self,
            record: &RecordRef,
            entries: Vec<BlobEntry>,
        ) -> PluginResult<Vec<Digest>> {
            if self.frozen.lock().unwrap().contains(&record.tree) {
                return Err(PluginError::RecordFrozen(record.tree));
            }
            let keys = entries.iter().map(BlobEntry::key).collect();
            self.blobs
                .lock()
                .unwrap()
                .entry(record.tree)
                .or_default()
                .extend(entries);
            Ok(keys)
        }

        async fn blobs_by_descriptor(
            &self,
            record: &RecordRef,
            desc: &str,
        ) -> PluginResult<Vec<BlobEntry>> {
            Ok(self
                .blobs
                .lock()
                .unwrap()
                .get(&record.tree)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|e| e.descriptor().unwrap().descriptor == desc)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    struct Fixture {
        backend: Arc<MemoryBackend>,
        server: Arc<SigningKey>,
        plugin: Arc<CommentsPlugin>,
        token: Token,
    }

    fn make_fixture_with(settings: &[PluginSetting]) -> Fixture {
        let backend = Arc::new(MemoryBackend::default());
        let token = backend.add_record(RecordState::Vetted, 7, RecordStatus::Public);
        let server = Arc::new(SigningKey::generate());
        let plugin = Arc::new(
            CommentsPlugin::new(backend.clone(), Arc::clone(&server), settings).unwrap(),
        );
        Fixture {
            backend,
            server,
            plugin,
            token,
        }
    }

    fn make_fixture() -> Fixture {
        make_fixture_with(&[])
    }

    struct User {
        id: String,
        key: SigningKey,
    }

    impl User {
        fn new() -> Self {
            Self {
                id: uuid::Uuid::now_v7().to_string(),
                key: SigningKey::generate(),
            }
        }

        fn public_key(&self) -> String {
            self.key.verifying_key().to_hex()
        }

        fn sign(&self, message: &str) -> String {
            self.key.sign(message.as_bytes()).to_hex()
        }

        fn new_comment(&self, token: Token, parent_id: u32, text: &str) -> New {
            let state = RecordState::Vetted.as_u32();
            New {
                user_id: self.id.clone(),
                state,
                token: token.to_hex(),
                parent_id,
                comment: text.into(),
                public_key: self.public_key(),
                signature: self.sign(&format!("{state}{}{parent_id}{text}", token.to_hex())),
            }
        }

        fn edit_comment(&self, token: Token, parent_id: u32, comment_id: u32, text: &str) -> Edit {
            let state = RecordState::Vetted.as_u32();
            Edit {
                user_id: self.id.clone(),
                state,
                token: token.to_hex(),
                parent_id,
                comment_id,
                comment: text.into(),
                public_key: self.public_key(),
                signature: self.sign(&format!(
                    "{state}{}{parent_id}{comment_id}{text}",
                    token.to_hex()
                )),
            }
        }

        fn del_comment(&self, token: Token, comment_id: u32, reason: &str) -> Del {
            let state = RecordState::Vetted.as_u32();
            Del {
                state,
                token: token.to_hex(),
                comment_id,
                reason: reason.into(),
                public_key: self.public_key(),
                signature: self.sign(&format!("{state}{}{comment_id}{reason}", token.to_hex())),
            }
        }

        fn vote(&self, token: Token, comment_id: u32, vote: i32) -> Vote {
            let state = RecordState::Vetted.as_u32();
            Vote {
                user_id: self.id.clone(),
                state,
                token: token.to_hex(),
                comment_id,
                vote,
                public_key: self.public_key(),
                signature: self.sign(&format!("{state}{}{comment_id}{vote}", token.to_hex())),
            }
        }
    }

    fn error_code(err: PluginError) -> i32 {
        match err {
            PluginError::User(e) => {
                assert_eq!(e.plugin_id, PLUGIN_ID);
                e.error_code
            }
            other => panic!("expected user error, got {other}"),
        }
    }

    async fn post(fx: &Fixture, user: &User, text: &str) -> Comment {
        fx.plugin
            .clone()
            .cmd_new(user.new_comment(fx.token, 0, text))
            .await
            .unwrap()
            .comment
    }

    // ---------------------------------------------------------------------------
    // new
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn new_comment_gets_id_and_receipt() {
        let fx = make_fixture();
        let author = User::new();

        let first = post(&fx, &author, "first").await;
        let second = post(&fx, &author, "second").await;
        assert_eq!(first.comment_id, 1);
        assert_eq!(second.comment_id, 2);
        assert_eq!(first.version, 1);

        let receipt = Signature::from_hex(&first.receipt).unwrap();
        fx.server
            .verifying_key()
            .verify(first.signature.as_bytes(), &receipt)
            .unwrap();
    }

    #[tokio::test]
    async fn new_comment_validation_errors() {
        let fx = make_fixture();
        let user = User::new();

        let mut bad_state = user.new_comment(fx.token, 0, "c");
        bad_state.state = 0;
        assert_eq!(
            error_code(fx.plugin.clone().cmd_new(bad_state).await.unwrap_err()),
            ErrorCode::StateInvalid.as_i32()
        );

        let mut bad_token = user.new_comment(fx.token, 0, "c");
        bad_token.token = "invalid".into();
        assert_eq!(
            error_code(fx.plugin.clone().cmd_new(bad_token).await.unwrap_err()),
            ErrorCode::TokenInvalid.as_i32()
        );

        let mut bad_key = user.new_comment(fx.token, 0, "c");
        bad_key.public_key = "invalid".into();
        assert_eq!(
            error_code(fx.plugin.clone().cmd_new(bad_key).await.unwrap_err()),
            ErrorCode::PublicKeyInvalid.as_i32()
        );

        let mut bad_sig = user.new_comment(fx.token, 0, "c");
        bad_sig.signature = "invalid".into();
        assert_eq!(
            error_code(fx.plugin.clone().cmd_new(bad_sig).await.unwrap_err()),
            ErrorCode::SignatureInvalid.as_i32()
        );

        // Signed by a different key.
        let mut wrong_signer = user.new_comment(fx.token, 0, "c");
        wrong_signer.signature = User::new().sign("1");
        assert_eq!(
            error_code(fx.plugin.clone().cmd_new(wrong_signer).await.unwrap_err()),
            ErrorCode::SignatureInvalid.as_i32()
        );

        let unknown = Token::from_tree_id(TreeId(123));
        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_new(user.new_comment(unknown, 0, "c"))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::RecordNotFound.as_i32()
        );

        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_new(user.new_comment(fx.token, 3, "c"))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::ParentIdInvalid.as_i32()
        );
    }

    #[tokio::test]
    async fn comment_length_is_bounded_by_setting() {
        let fx = make_fixture_with(&[PluginSetting::new(SETTING_COMMENT_LENGTH_MAX, "5")]);
        let user = User::new();
        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_new(user.new_comment(fx.token, 0, "toolong"))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::CommentTextInvalid.as_i32()
        );
        assert!(fx
            .plugin
            .clone()
            .cmd_new(user.new_comment(fx.token, 0, "short"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn replies_reference_existing_parent() {
        let fx = make_fixture();
        let user = User::new();
        let parent = post(&fx, &user, "parent").await;

        let reply = fx
            .plugin
            .clone()
            .cmd_new(user.new_comment(fx.token, parent.comment_id, "reply"))
            .await
            .unwrap();
        assert_eq!(reply.comment.parent_id, parent.comment_id);
    }

    #[tokio::test]
    async fn censored_record_refuses_comments() {
        let fx = make_fixture();
        fx.backend
            .set_status(RecordState::Vetted, fx.token, RecordStatus::Censored);
        let err = fx
            .plugin
            .clone()
            .cmd_new(User::new().new_comment(fx.token, 0, "c"))
            .await
            .unwrap_err();
        assert_eq!(error_code(err), ErrorCode::RecordStateInvalid.as_i32());
    }

    #[tokio::test]
    async fn frozen_tree_refuses_writes_as_user_error() {
        let fx = make_fixture();
        let author = User::new();
        let c = post(&fx, &author, "before").await;
        fx.backend.freeze(fx.token.tree_id());

        let err = fx
            .plugin
            .clone()
            .cmd_new(author.new_comment(fx.token, 0, "after"))
            .await
            .unwrap_err();
        assert_eq!(error_code(err), ErrorCode::RecordStateInvalid.as_i32());
        let err = fx
            .plugin
            .clone()
            .cmd_vote(User::new().vote(fx.token, c.comment_id, VOTE_UP))
            .await
            .unwrap_err();
        assert_eq!(error_code(err), ErrorCode::RecordStateInvalid.as_i32());
    }

    // ---------------------------------------------------------------------------
    // edit / del
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn edit_bumps_version_and_requires_author() {
        let fx = make_fixture();
        let author = User::new();
        let c = post(&fx, &author, "original").await;

        let edited = fx
            .plugin
            .clone()
            .cmd_edit(author.edit_comment(fx.token, 0, c.comment_id, "fixed"))
            .await
            .unwrap();
        assert_eq!(edited.comment.version, 2);
        assert_eq!(edited.comment.comment, "fixed");

        let intruder = User::new();
        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_edit(intruder.edit_comment(fx.token, 0, c.comment_id, "mine now"))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::UserUnauthorized.as_i32()
        );

        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_edit(author.edit_comment(fx.token, 0, c.comment_id, "fixed"))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::CommentTextInvalid.as_i32()
        );

        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_edit(author.edit_comment(fx.token, 0, 99, "x"))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::CommentNotFound.as_i32()
        );

        let v1 = fx
            .plugin
            .clone()
            .cmd_get_version(GetVersion {
                state: RecordState::Vetted.as_u32(),
                token: fx.token.to_hex(),
                comment_id: c.comment_id,
                version: 1,
            })
            .await
            .unwrap();
        assert_eq!(v1.comment.comment, "original");
    }

    #[tokio::test]
    async fn delete_leaves_a_tombstone() {
        let fx = make_fixture();
        let author = User::new();
        let admin = User::new();
        let c = post(&fx, &author, "regrettable").await;

        let del = fx
            .plugin
            .clone()
            .cmd_del(admin.del_comment(fx.token, c.comment_id, "off topic"))
            .await
            .unwrap();
        assert!(del.comment.deleted);
        assert_eq!(del.comment.comment, "");
        assert_eq!(del.comment.reason, "off topic");

        let all = fx
            .plugin
            .clone()
            .cmd_get_all(GetAll {
                state: RecordState::Vetted.as_u32(),
                token: fx.token.to_hex(),
            })
            .await
            .unwrap();
        assert_eq!(all.comments.len(), 1);
        assert!(all.comments[0].deleted);

        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_del(admin.del_comment(fx.token, c.comment_id, "again"))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::CommentNotFound.as_i32()
        );
        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_vote(admin.vote(fx.token, c.comment_id, VOTE_UP))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::CommentNotFound.as_i32()
        );

        // New ids keep counting past the deleted one.
        assert_eq!(post(&fx, &author, "next").await.comment_id, 2);
    }

    // ---------------------------------------------------------------------------
    // votes
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn votes_toggle_and_are_scored_per_user() {
        let fx = make_fixture();
        let author = User::new();
        let alice = User::new();
        let bob = User::new();
        let c = post(&fx, &author, "vote on me").await;

        let r = fx
            .plugin
            .clone()
            .cmd_vote(alice.vote(fx.token, c.comment_id, VOTE_UP))
            .await
            .unwrap();
        assert_eq!((r.downvotes, r.upvotes), (0, 1));

        let r = fx
            .plugin
            .clone()
            .cmd_vote(bob.vote(fx.token, c.comment_id, VOTE_DOWN))
            .await
            .unwrap();
        assert_eq!((r.downvotes, r.upvotes), (1, 1));

        // Repeating the same vote retracts it.
        let r = fx
            .plugin
            .clone()
            .cmd_vote(alice.vote(fx.token, c.comment_id, VOTE_UP))
            .await
            .unwrap();
        assert_eq!((r.downvotes, r.upvotes), (1, 0));

        let votes = fx
            .plugin
            .clone()
            .cmd_votes(Votes {
                state: RecordState::Vetted.as_u32(),
                token: fx.token.to_hex(),
                user_id: alice.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(votes.votes.len(), 2);

        let got = fx
            .plugin
            .clone()
            .cmd_get(Get {
                state: RecordState::Vetted.as_u32(),
                token: fx.token.to_hex(),
                comment_ids: vec![c.comment_id, 42],
            })
            .await
            .unwrap();
        assert_eq!(got.comments.len(), 1);
        assert_eq!(got.comments[&c.comment_id].downvotes, 1);
    }

    #[tokio::test]
    async fn vote_rules() {
        let fx = make_fixture_with(&[PluginSetting::new(SETTING_VOTE_CHANGES_MAX, "2")]);
        let author = User::new();
        let voter = User::new();
        let c = post(&fx, &author, "c").await;

        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_vote(author.vote(fx.token, c.comment_id, VOTE_UP))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::UserUnauthorized.as_i32()
        );
        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_vote(voter.vote(fx.token, c.comment_id, 3))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::VoteInvalid.as_i32()
        );

        // One vote plus two changes.
        for vote in [VOTE_UP, VOTE_DOWN, VOTE_UP] {
            fx.plugin
                .clone()
                .cmd_vote(voter.vote(fx.token, c.comment_id, vote))
                .await
                .unwrap();
        }
        assert_eq!(
            error_code(
                fx.plugin
                    .clone()
                    .cmd_vote(voter.vote(fx.token, c.comment_id, VOTE_DOWN))
                    .await
                    .unwrap_err()
            ),
            ErrorCode::VoteChangesMax.as_i32()
        );
    }

    #[tokio::test]
    async fn single_vote_change_is_allowed() {
        let fx = make_fixture_with(&[PluginSetting::new(SETTING_VOTE_CHANGES_MAX, "1")]);
        let author = User::new();
        let voter = User::new();
        let c = post(&fx, &author, "c").await;

        fx.plugin
            .clone()
            .cmd_vote(voter.vote(fx.token, c.comment_id, VOTE_UP))
            .await
            .unwrap();
        let reply = fx
            .plugin
            .clone()
            .cmd_vote(voter.vote(fx.token, c.comment_id, VOTE_DOWN))
            .await
            .unwrap();
        assert_eq!((reply.downvotes, reply.upvotes), (1, 0));

        let err = fx
            .plugin
            .clone()
            .cmd_vote(voter.vote(fx.token, c.comment_id, VOTE_UP))
            .await
            .unwrap_err();
        assert_eq!(error_code(err), ErrorCode::VoteChangesMax.as_i32());

        // Other voters have their own budget.
        let other = User::new();
        fx.plugin
            .clone()
            .cmd_vote(other.vote(fx.token, c.comment_id, VOTE_UP))
            .await
            .unwrap();
    }

    // ---------------------------------------------------------------------------
    // dispatch
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn commands_dispatch_through_registry() {
        let fx = make_fixture();
        let registry = PluginRegistry::new();
        assert!(registry.register(fx.plugin.clone()));

        let user = User::new();
        let payload = serde_json::to_string(&user.new_comment(fx.token, 0, "hello")).unwrap();
        let reply = registry.execute(PLUGIN_ID, cmd::NEW, &payload).await.unwrap();
        let reply: NewReply = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply.comment.comment, "hello");

        let count = serde_json::to_string(&Count {
            state: RecordState::Vetted.as_u32(),
            token: fx.token.to_hex(),
        })
        .unwrap();
        let reply: CountReply =
            serde_json::from_str(&registry.execute(PLUGIN_ID, cmd::COUNT, &count).await.unwrap())
                .unwrap();
        assert_eq!(reply.count, 1);

        let err = registry
            .execute(PLUGIN_ID, cmd::NEW, "{\"nope\":1}")
            .await
            .unwrap_err();
        assert_eq!(error_code(err), ErrorCode::Invalid.as_i32());
    }

    #[test]
    fn settings_parse_and_reject_unknown_keys() {
        let parsed = CommentsSettings::from_settings(&[
            PluginSetting::new(SETTING_COMMENT_LENGTH_MAX, "10"),
            PluginSetting::new(SETTING_VOTE_CHANGES_MAX, "1"),
        ])
        .unwrap();
        assert_eq!(parsed.comment_length_max, 10);
        assert_eq!(parsed.vote_changes_max, 1);

        assert!(matches!(
            CommentsSettings::from_settings(&[PluginSetting::new("color", "red")]),
            Err(PluginError::Setting { .. })
        ));
        assert!(matches!(
            CommentsSettings::from_settings(&[PluginSetting::new(SETTING_VOTE_CHANGES_MAX, "x")]),
            Err(PluginError::Setting { .. })
        ));
    }
}
