use std::collections::BTreeMap;

use super::types::{Comment, CommentAdd, CommentDel, CommentVote};

/// Everything stored for one comment id.
#[derive(Clone, Debug, Default)]
pub(crate) struct CommentEntry {
    /// Version -> add.
    pub adds: BTreeMap<u32, CommentAdd>,
    pub del: Option<CommentDel>,
    /// User id -> votes in append order.
    pub votes: BTreeMap<String, Vec<CommentVote>>,
}

impl CommentEntry {
    pub fn latest(&self) -> Option<&CommentAdd> {
        self.adds.values().next_back()
    }

    pub fn is_deleted(&self) -> bool {
        self.del.is_some()
    }

    /// Current vote of `user`: repeating a vote retracts it.
    pub fn user_vote(&self, user: &str) -> i32 {
        self.votes
            .get(user)
            .map(|votes| net_vote(votes))
            .unwrap_or_default()
    }

    /// Votes cast by `user` after their first one.
    pub fn vote_changes(&self, user: &str) -> usize {
        self.votes
            .get(user)
            .map_or(0, |votes| votes.len().saturating_sub(1))
    }

    /// `(downvotes, upvotes)` over every user's net vote.
    pub fn score(&self) -> (u64, u64) {
        self.votes
            .values()
            .fold((0, 0), |(down, up), votes| match net_vote(votes) {
                v if v < 0 => (down + 1, up),
                v if v > 0 => (down, up + 1),
                _ => (down, up),
            })
    }

    /// The comment at `add`, with current scores. A deleted comment keeps
    /// its identity but shows no text.
    pub fn render(&self, add: &CommentAdd) -> Comment {
        let (downvotes, upvotes) = self.score();
        let mut comment = Comment {
            user_id: add.user_id.clone(),
            state: add.state,
            token: add.token.clone(),
            parent_id: add.parent_id,
            comment: add.comment.clone(),
            public_key: add.public_key.clone(),
            signature: add.signature.clone(),
            comment_id: add.comment_id,
            version: add.version,
            timestamp: add.timestamp,
            receipt: add.receipt.clone(),
            downvotes,
            upvotes,
            deleted: false,
            reason: String::new(),
        };
        if let Some(del) = &self.del {
            comment.comment = String::new();
            comment.signature = String::new();
            comment.deleted = true;
            comment.reason = del.reason.clone();
            comment.timestamp = del.timestamp;
            comment.receipt = del.receipt.clone();
        }
        comment
    }
}

fn net_vote(votes: &[CommentVote]) -> i32 {
    votes
        .iter()
        .fold(0, |current, v| if current == v.vote { 0 } else { v.vote })
}

/// Comment state of one record, rebuilt from its blobs.
#[derive(Clone, Debug, Default)]
pub(crate) struct CommentsIndex {
    pub comments: BTreeMap<u32, CommentEntry>,
}

impl CommentsIndex {
    pub fn build(adds: Vec<CommentAdd>, dels: Vec<CommentDel>, votes: Vec<CommentVote>) -> Self {
        let mut index = Self::default();
        for add in adds {
            index
                .comments
                .entry(add.comment_id)
                .or_default()
                .adds
                .insert(add.version, add);
        }
        for del in dels {
            if let Some(entry) = index.comments.get_mut(&del.comment_id) {
                entry.del.get_or_insert(del);
            }
        }
        for vote in votes {
            if let Some(entry) = index.comments.get_mut(&vote.comment_id) {
                entry.votes.entry(vote.user_id.clone()).or_default().push(vote);
            }
        }
        index
    }

    pub fn next_id(&self) -> u32 {
        self.comments.keys().next_back().map_or(1, |id| id + 1)
    }

    pub fn get(&self, id: u32) -> Option<&CommentEntry> {
        self.comments.get(&id)
    }

    /// Latest version of comment `id`.
    pub fn comment(&self, id: u32) -> Option<Comment> {
        let entry = self.comments.get(&id)?;
        entry.latest().map(|add| entry.render(add))
    }

    pub fn comment_version(&self, id: u32, version: u32) -> Option<Comment> {
        let entry = self.comments.get(&id)?;
        entry.adds.get(&version).map(|add| entry.render(add))
    }

    pub fn all(&self) -> Vec<Comment> {
        self.comments.keys().filter_map(|id| self.comment(*id)).collect()
    }

    /// Every vote cast by `user`, by comment id then append order.
    pub fn votes_by(&self, user: &str) -> Vec<CommentVote> {
        self.comments
            .values()
            .filter_map(|entry| entry.votes.get(user))
            .flatten()
            .cloned()
            .collect()
    }
}
