//! Wire and storage types of the comments plugin.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const PLUGIN_ID: &str = "comments";
pub const PLUGIN_VERSION: &str = "1";

/// Command names.
pub mod cmd {
    pub const NEW: &str = "new";
    pub const EDIT: &str = "edit";
    pub const DEL: &str = "del";
    pub const VOTE: &str = "vote";
    pub const GET: &str = "get";
    pub const GET_ALL: &str = "getall";
    pub const GET_VERSION: &str = "getversion";
    pub const COUNT: &str = "count";
    pub const VOTES: &str = "votes";
}

/// Blob descriptors the plugin writes.
pub mod descriptor {
    pub const COMMENT_ADD: &str = "comments:add";
    pub const COMMENT_DEL: &str = "comments:del";
    pub const COMMENT_VOTE: &str = "comments:vote";
}

pub const SETTING_COMMENT_LENGTH_MAX: &str = "commentlengthmax";
pub const SETTING_VOTE_CHANGES_MAX: &str = "votechangesmax";
pub const DEFAULT_COMMENT_LENGTH_MAX: usize = 8000;
pub const DEFAULT_VOTE_CHANGES_MAX: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Invalid = 0,
    StateInvalid = 1,
    TokenInvalid = 2,
    PublicKeyInvalid = 3,
    SignatureInvalid = 4,
    CommentTextInvalid = 5,
    RecordNotFound = 6,
    CommentNotFound = 7,
    UserUnauthorized = 8,
    ParentIdInvalid = 9,
    VoteInvalid = 10,
    VoteChangesMax = 11,
    RecordStateInvalid = 12,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

pub const VOTE_DOWN: i32 = -1;
pub const VOTE_UP: i32 = 1;

// ---------------------------------------------------------------------------
// Stored objects
// ---------------------------------------------------------------------------

/// One version of a comment, as written by `new` or `edit`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentAdd {
    pub user_id: String,
    pub state: u32,
    pub token: String,
    pub parent_id: u32,
    pub comment: String,
    pub public_key: String,
    pub signature: String,
    pub comment_id: u32,
    pub version: u32,
    pub timestamp: i64,
    /// Server signature over `signature`.
    pub receipt: String,
}

/// Tombstone for a deleted comment. Earlier versions stay in the tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDel {
    pub token: String,
    pub state: u32,
    pub comment_id: u32,
    pub reason: String,
    pub public_key: String,
    pub signature: String,
    pub parent_id: u32,
    pub author_public_key: String,
    pub timestamp: i64,
    pub receipt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentVote {
    pub user_id: String,
    pub state: u32,
    pub token: String,
    pub comment_id: u32,
    pub vote: i32,
    pub public_key: String,
    pub signature: String,
    pub timestamp: i64,
    pub receipt: String,
}

/// A comment as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub user_id: String,
    pub state: u32,
    pub token: String,
    pub parent_id: u32,
    pub comment: String,
    pub public_key: String,
    pub signature: String,
    pub comment_id: u32,
    pub version: u32,
    pub timestamp: i64,
    pub receipt: String,
    pub downvotes: u64,
    pub upvotes: u64,
    pub deleted: bool,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct New {
    pub user_id: String,
    pub state: u32,
    pub token: String,
    pub parent_id: u32,
    pub comment: String,
    pub public_key: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReply {
    pub comment: Comment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    pub user_id: String,
    pub state: u32,
    pub token: String,
    pub parent_id: u32,
    pub comment_id: u32,
    pub comment: String,
    pub public_key: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditReply {
    pub comment: Comment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Del {
    pub state: u32,
    pub token: String,
    pub comment_id: u32,
    pub reason: String,
    pub public_key: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelReply {
    pub comment: Comment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub user_id: String,
    pub state: u32,
    pub token: String,
    pub comment_id: u32,
    /// [`VOTE_UP`] or [`VOTE_DOWN`].
    pub vote: i32,
    pub public_key: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReply {
    pub downvotes: u64,
    pub upvotes: u64,
    pub timestamp: i64,
    pub receipt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Get {
    pub state: u32,
    pub token: String,
    pub comment_ids: Vec<u32>,
}

/// Requested comments that exist, keyed by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReply {
    pub comments: BTreeMap<u32, Comment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAll {
    pub state: u32,
    pub token: String,
}

/// Every comment, ordered by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllReply {
    pub comments: Vec<Comment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVersion {
    pub state: u32,
    pub token: String,
    pub comment_id: u32,
    pub version: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVersionReply {
    pub comment: Comment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub state: u32,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountReply {
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Votes {
    pub state: u32,
    pub token: String,
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotesReply {
    pub votes: Vec<CommentVote>,
}
