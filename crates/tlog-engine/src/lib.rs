//! The trust log engine.
//!
//! A [`Tlog`] turns "save this record state" into a correctly ordered batch
//! of leaves on one tree of a verifiable log, with every leaf pointing at a
//! content-addressed blob. One `Tlog` serves one record category; the
//! backend runs two (unvetted, vetted).
//!
//! # Leaves
//!
//! Each leaf value is the digest of a [`tlog_store::BlobEntry`] payload, and
//! its extra data names the blob descriptor and key ([`ExtraData`]). A save
//! appends new content leaves followed by one [`RecordIndex`] leaf in a
//! single batch. Content leaves that no record index references are
//! orphans: they mark a failed update and are never served as live content.
//!
//! # Concurrency
//!
//! Writes to a tree are serialized through [`TreeLocks`]. The
//! [`AnchorScheduler`] takes the same locks while it captures roots and
//! appends [`Anchor`] leaves, so no save interleaves with an anchoring round.

pub mod anchor;
pub mod error;
pub mod fsck;
pub mod leaf;
pub mod locks;
pub mod record_index;
pub mod scheduler;
pub mod tlog;

pub use anchor::Anchor;
pub use error::{TlogError, TlogResult};
pub use fsck::{LeafClass, LeafReport, TreeReport};
pub use leaf::{ExtraData, LeafKind};
pub use locks::{TreeGuard, TreeLocks};
pub use record_index::{FreezeRecord, RecordIndex};
pub use scheduler::{AnchorConfig, AnchorRound, AnchorScheduler};
pub use tlog::{RecordContent, StagedAnchor, Tlog, ENCRYPTION_KEY_VERSION};
