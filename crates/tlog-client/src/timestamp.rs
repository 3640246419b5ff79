use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tlog_crypto::MerkleTree;
use tlog_types::Digest;
use tracing::debug;

use crate::error::{TimestampError, TimestampResult};

/// Identifier of one submission to the timestamp service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a digest landed on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInformation {
    pub transaction: String,
    pub merkle_root: Digest,
    /// Unix seconds; 0 until the transaction is confirmed.
    pub chain_timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyResult {
    /// Anchored on chain.
    Ok,
    /// Accepted, not yet confirmed.
    Pending,
    /// The service does not know this digest.
    NotFound,
}

/// Per-digest verification result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyDigest {
    pub digest: Digest,
    pub result: VerifyResult,
    pub server_timestamp: i64,
    pub chain_information: ChainInformation,
}

impl VerifyDigest {
    pub fn is_confirmed(&self) -> bool {
        self.result == VerifyResult::Ok && self.chain_information.chain_timestamp != 0
    }
}

/// Client boundary of the external timestamp service.
#[async_trait]
pub trait Timestamper: Send + Sync {
    /// Submit digests for anchoring as one batch.
    async fn submit(&self, digests: &[Digest]) -> TimestampResult<BatchId>;

    /// Current status of every digest in a batch. May report
    /// [`VerifyResult::Pending`]; callers poll.
    async fn verify(&self, batch: &BatchId) -> TimestampResult<Vec<VerifyDigest>>;
}

/// In-process timestamp service.
///
/// A batch is confirmed after a configurable number of `verify` polls. The
/// on-chain merkle root is the classical merkle root of the batch.
pub struct InMemoryTimestamper {
    confirm_after: u32,
    inner: Mutex<TimestamperState>,
}

#[derive(Default)]
struct TimestamperState {
    batches: HashMap<BatchId, Batch>,
    fail_submits: u32,
}

struct Batch {
    digests: Vec<Digest>,
    submitted_at: i64,
    polls: u32,
}

impl InMemoryTimestamper {
    /// `confirm_after` = 0 confirms on the first poll.
    pub fn new(confirm_after: u32) -> Self {
        Self {
            confirm_after,
            inner: Mutex::new(TimestamperState::default()),
        }
    }

    /// Make the next `n` submissions fail as unavailable.
    pub fn fail_next_submits(&self, n: u32) {
        self.inner.lock().expect("lock poisoned").fail_submits = n;
    }

    /// Number of batches accepted so far.
    pub fn batch_count(&self) -> usize {
        self.inner.lock().expect("lock poisoned").batches.len()
    }
}

impl Default for InMemoryTimestamper {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl Timestamper for InMemoryTimestamper {
    async fn submit(&self, digests: &[Digest]) -> TimestampResult<BatchId> {
        let mut state = self.inner.lock().expect("lock poisoned");
        if state.fail_submits > 0 {
            state.fail_submits -= 1;
            return Err(TimestampError::Unavailable("injected fault".into()));
        }
        if digests.is_empty() {
            return Err(TimestampError::Rejected("empty batch".into()));
        }
        let id = BatchId(uuid::Uuid::now_v7().to_string());
        state.batches.insert(
            id.clone(),
            Batch {
                digests: digests.to_vec(),
                submitted_at: chrono::Utc::now().timestamp(),
                polls: 0,
            },
        );
        debug!(batch = %id, digests = digests.len(), "timestamp batch submitted");
        Ok(id)
    }

    async fn verify(&self, batch: &BatchId) -> TimestampResult<Vec<VerifyDigest>> {
        let mut state = self.inner.lock().expect("lock poisoned");
        let entry = state
            .batches
            .get_mut(batch)
            .ok_or_else(|| TimestampError::BatchNotFound(batch.0.clone()))?;
        entry.polls += 1;
        let confirmed = entry.polls > self.confirm_after;

        let merkle_root = MerkleTree::root_of(&entry.digests);
        let (result, transaction, chain_timestamp) = if confirmed {
            (
                VerifyResult::Ok,
                Digest::of(batch.0.as_bytes()).to_hex(),
                chrono::Utc::now().timestamp(),
            )
        } else {
            (VerifyResult::Pending, String::new(), 0)
        };

        Ok(entry
            .digests
            .iter()
            .map(|d| VerifyDigest {
                digest: *d,
                result,
                server_timestamp: entry.submitted_at,
                chain_information: ChainInformation {
                    transaction: transaction.clone(),
                    merkle_root,
                    chain_timestamp,
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digests() -> Vec<Digest> {
        vec![Digest::of(b"root-1"), Digest::of(b"root-2")]
    }

    #[tokio::test]
    async fn confirms_after_configured_polls() {
        let ts = InMemoryTimestamper::new(2);
        let batch = ts.submit(&digests()).await.unwrap();

        for _ in 0..2 {
            let results = ts.verify(&batch).await.unwrap();
            assert!(results.iter().all(|r| r.result == VerifyResult::Pending));
            assert!(results.iter().all(|r| !r.is_confirmed()));
        }
        let results = ts.verify(&batch).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(VerifyDigest::is_confirmed));
        assert_eq!(
            results[0].chain_information.merkle_root,
            MerkleTree::root_of(&digests())
        );
    }

    #[tokio::test]
    async fn unknown_batch_is_not_found() {
        let ts = InMemoryTimestamper::default();
        assert!(matches!(
            ts.verify(&BatchId("nope".into())).await,
            Err(TimestampError::BatchNotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_submit_failures_are_transient() {
        let ts = InMemoryTimestamper::default();
        ts.fail_next_submits(1);
        let err = ts.submit(&digests()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(ts.submit(&digests()).await.is_ok());
        assert_eq!(ts.batch_count(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let ts = InMemoryTimestamper::default();
        assert!(matches!(
            ts.submit(&[]).await,
            Err(TimestampError::Rejected(_))
        ));
    }
}
