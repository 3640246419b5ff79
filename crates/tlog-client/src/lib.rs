//! Narrow clients for the two remote collaborators of the backend.
//!
//! - [`LogClient`] -- the verifiable append-only log service: tree creation,
//!   ordered batch append, leaf retrieval, and signed log roots.
//! - [`Timestamper`] -- the external timestamp service that anchors log
//!   roots into a public chain. Results are asynchronous and polled.
//!
//! Both are black boxes behind `async` traits. [`InMemoryLogClient`] and
//! [`InMemoryTimestamper`] implement them in-process for tests, demos, and
//! single-node deployments; both can inject faults.
//!
//! Every remote call is bounded by a [`RetryPolicy`]. Idempotent calls are
//! retried with exponential backoff on transient errors; appends are only
//! bounded by the timeout and left to the caller to reconcile.

pub mod error;
pub mod leaf;
pub mod memory;
pub mod retry;
pub mod timestamp;
pub mod traits;

pub use error::{LogError, LogResult, TimestampError, TimestampResult};
pub use leaf::{AppendResult, LeafInput, LeafStatus, LogLeaf, LogRoot, QueuedLeafProof, SignedLogRoot};
pub use memory::{AppendFault, InMemoryLogClient};
pub use retry::{Retryable, RetryPolicy};
pub use timestamp::{
    BatchId, ChainInformation, InMemoryTimestamper, Timestamper, VerifyDigest, VerifyResult,
};
pub use traits::LogClient;
