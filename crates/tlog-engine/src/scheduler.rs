use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tlog_client::{BatchId, RetryPolicy, SignedLogRoot, TimestampError, Timestamper, VerifyDigest};
use tlog_types::{Digest, TreeId};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::anchor::Anchor;
use crate::error::{TlogError, TlogResult};
use crate::locks::TreeGuard;
use crate::tlog::Tlog;

/// Anchor scheduler settings (`[anchor]` in the backend config).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub enabled: bool,
    /// Seconds between rounds.
    pub interval_secs: u64,
    /// Delay between confirmation polls within a round.
    pub confirm_poll_ms: u64,
    /// Polls before a round gives up and leaves its trees pending.
    pub confirm_attempts: u32,
    /// Bounds for the timestamp service calls.
    pub retry: RetryPolicy,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            confirm_poll_ms: 1_000,
            confirm_attempts: 30,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one anchoring round.
///
/// Each tree commits its anchor on its own. A tree whose append failed has
/// no anchor leaf and stays pending for the next round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnchorRound {
    /// `(tlog name, tree)` for every tree that received an anchor.
    pub anchored: Vec<(String, TreeId)>,
    /// `(tlog name, tree)` for every confirmed tree whose append failed.
    pub failed: Vec<(String, TreeId)>,
}

impl AnchorRound {
    pub fn is_empty(&self) -> bool {
        self.anchored.is_empty() && self.failed.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Pending {
    tlog: usize,
    guard: TreeGuard,
    signed: SignedLogRoot,
    root_hash: Digest,
}

/// Periodically timestamps the roots of every tree with unanchored leaves.
pub struct AnchorScheduler {
    tlogs: Vec<Arc<Tlog>>,
    timestamper: Arc<dyn Timestamper>,
    config: AnchorConfig,
}

impl AnchorScheduler {
    pub fn new(
        tlogs: Vec<Arc<Tlog>>,
        timestamper: Arc<dyn Timestamper>,
        config: AnchorConfig,
    ) -> Self {
        Self {
            tlogs,
            timestamper,
            config,
        }
    }

    /// Run rounds on the configured interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("anchor scheduler disabled");
            return;
        }

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval_secs = self.config.interval_secs, "anchor scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.round(&cancel).await {
                        Ok(round) if round.is_empty() => debug!("no trees to anchor"),
                        Ok(round) if !round.is_complete() => warn!(
                            anchored = round.anchored.len(),
                            failed = round.failed.len(),
                            "anchor round incomplete, failed trees stay pending"
                        ),
                        Ok(round) => info!(trees = round.anchored.len(), "anchor round complete"),
                        Err(e) => error!(error = %e, "anchor round failed, trees stay pending"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("anchor scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single round immediately.
    pub async fn anchor_round(&self) -> TlogResult<AnchorRound> {
        self.round(&CancellationToken::new()).await
    }

    async fn round(&self, cancel: &CancellationToken) -> TlogResult<AnchorRound> {
        let pending = self.capture().await?;
        if pending.is_empty() {
            return Ok(AnchorRound::default());
        }

        let digests: Vec<Digest> = pending.iter().map(|p| p.root_hash).collect();
        let batch = self
            .config
            .retry
            .run("timestamp_submit", || self.timestamper.submit(&digests))
            .await?;
        info!(batch = %batch, trees = pending.len(), "roots submitted for timestamping");

        let Some(confirmed) = self.await_confirmation(&batch, &digests, cancel).await? else {
            warn!(batch = %batch, "timestamp batch not confirmed this round");
            return Ok(AnchorRound::default());
        };

        // Every blob is durable before the first anchor leaf goes in.
        let mut staged = Vec::with_capacity(pending.len());
        for p in &pending {
            let verify_digest = confirmed.get(&p.root_hash).cloned().ok_or_else(|| {
                TlogError::Timestamp(TimestampError::Rejected(format!(
                    "root {} missing from confirmation",
                    p.root_hash.short_hex()
                )))
            })?;
            let anchor = Anchor {
                tree_id: p.guard.tree(),
                log_root: p.signed.log_root.clone(),
                verify_digest,
            };
            staged.push(self.tlogs[p.tlog].anchor_stage(&anchor)?);
        }

        // Each tree commits on its own. A failed append leaves that tree pending.
        let mut round = AnchorRound::default();
        for (p, staged) in pending.iter().zip(staged) {
            let tlog = &self.tlogs[p.tlog];
            let entry = (tlog.name().to_string(), p.guard.tree());
            match tlog.anchor_append(&p.guard, staged).await {
                Ok(_) => round.anchored.push(entry),
                Err(e) => {
                    error!(
                        tlog = %tlog.name(),
                        tree_id = %p.guard.tree(),
                        error = %e,
                        "anchor append failed, tree stays pending"
                    );
                    round.failed.push(entry);
                }
            }
        }
        Ok(round)
    }

    /// Lock every tree with unanchored leaves and capture its signed root.
    /// Locks on trees with nothing to anchor are released straight away.
    async fn capture(&self) -> TlogResult<Vec<Pending>> {
        let mut pending = Vec::new();
        for (i, tlog) in self.tlogs.iter().enumerate() {
            let trees = tlog.trees_all().await?;
            for guard in tlog.lock_trees(&trees).await {
                if !tlog.anchor_pending(&guard).await? {
                    continue;
                }
                let (signed, root) = tlog.signed_log_root(&guard).await?;
                debug!(
                    tlog = %tlog.name(),
                    tree_id = %guard.tree(),
                    tree_size = root.tree_size,
                    "root captured"
                );
                pending.push(Pending {
                    tlog: i,
                    guard,
                    signed,
                    root_hash: root.root_hash,
                });
            }
        }
        Ok(pending)
    }

    /// Poll until every digest is confirmed. `None` when attempts run out
    /// or the round is cancelled.
    async fn await_confirmation(
        &self,
        batch: &BatchId,
        digests: &[Digest],
        cancel: &CancellationToken,
    ) -> TlogResult<Option<HashMap<Digest, VerifyDigest>>> {
        for attempt in 1..=self.config.confirm_attempts.max(1) {
            let results = self
                .config
                .retry
                .run("timestamp_verify", || self.timestamper.verify(batch))
                .await?;
            let confirmed: HashMap<Digest, VerifyDigest> = results
                .into_iter()
                .filter(VerifyDigest::is_confirmed)
                .map(|v| (v.digest, v))
                .collect();
            if digests.iter().all(|d| confirmed.contains_key(d)) {
                return Ok(Some(confirmed));
            }

            debug!(batch = %batch, attempt, confirmed = confirmed.len(), total = digests.len(), "timestamp batch pending");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.config.confirm_poll_ms)) => {}
                _ = cancel.cancelled() => {
                    info!(batch = %batch, "anchor round abandoned");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for AnchorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorScheduler")
            .field("tlogs", &self.tlogs.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_client::{AppendFault, InMemoryLogClient, InMemoryTimestamper, LogClient};
    use tlog_crypto::EncryptionKey;
    use tlog_store::{BlobStore, InMemoryBlobStore};
    use tlog_types::{File, RecordMetadata, RecordStatus, Token};

    use crate::leaf::{ExtraData, LeafKind};

    fn fast_config(confirm_attempts: u32) -> AnchorConfig {
        AnchorConfig {
            enabled: true,
            interval_secs: 1,
            confirm_poll_ms: 1,
            confirm_attempts,
            retry: RetryPolicy {
                attempts: 2,
                base_delay_ms: 1,
                timeout_ms: 1_000,
            },
        }
    }

    fn make_tlog(name: &str, encrypted: bool) -> Arc<Tlog> {
        Arc::new(Tlog::new(
            name,
            Arc::new(InMemoryLogClient::new()) as Arc<dyn LogClient>,
            Arc::new(InMemoryBlobStore::new()) as Arc<dyn BlobStore>,
            encrypted.then(|| Arc::new(EncryptionKey::generate().0)),
            fast_config(1).retry,
        ))
    }

    async fn make_record(tlog: &Tlog) -> TreeId {
        let tree = tlog.tree_new().await.unwrap();
        let rm = RecordMetadata {
            token: Token::from_tree_id(tree),
            version: 1,
            iteration: 1,
            status: RecordStatus::NotReviewed,
            merkle: Digest::null(),
            timestamp: 0,
        };
        tlog.record_save(tree, rm, vec![], vec![File::from_bytes("a", "text/plain", b"a")])
            .await
            .unwrap();
        tree
    }

    async fn last_kind(tlog: &Tlog, tree: TreeId) -> LeafKind {
        let leaves = tlog.leaves_all(tree).await.unwrap();
        ExtraData::decode(&leaves.last().unwrap().extra_data)
            .unwrap()
            .kind()
    }

    #[tokio::test]
    async fn round_anchors_every_pending_tree_once() {
        let unvetted = make_tlog("unvetted", true);
        let vetted = make_tlog("vetted", false);
        let a = make_record(&unvetted).await;
        let b = make_record(&vetted).await;
        let empty = vetted.tree_new().await.unwrap();

        let ts = Arc::new(InMemoryTimestamper::new(1));
        let scheduler = AnchorScheduler::new(
            vec![unvetted.clone(), vetted.clone()],
            ts.clone(),
            fast_config(5),
        );

        let round = scheduler.anchor_round().await.unwrap();
        assert_eq!(round.anchored.len(), 2);
        assert_eq!(ts.batch_count(), 1);
        assert_eq!(last_kind(&unvetted, a).await, LeafKind::Anchor);
        assert_eq!(last_kind(&vetted, b).await, LeafKind::Anchor);
        assert!(vetted.leaves_all(empty).await.unwrap().is_empty());

        let anchor = vetted.anchor_latest(b).await.unwrap().unwrap();
        assert!(anchor.verify_digest.is_confirmed());
        assert_eq!(anchor.log_root().unwrap().tree_size, 3);

        // Nothing new since the last anchor.
        assert!(scheduler.anchor_round().await.unwrap().is_empty());
        assert_eq!(ts.batch_count(), 1);
    }

    #[tokio::test]
    async fn failed_submission_records_nothing() {
        let vetted = make_tlog("vetted", false);
        let tree = make_record(&vetted).await;
        let before = vetted.leaves_all(tree).await.unwrap().len();

        let ts = Arc::new(InMemoryTimestamper::new(0));
        ts.fail_next_submits(5);
        let scheduler = AnchorScheduler::new(vec![vetted.clone()], ts.clone(), fast_config(1));

        assert!(scheduler.anchor_round().await.is_err());
        assert_eq!(vetted.leaves_all(tree).await.unwrap().len(), before);

        // Next round succeeds.
        ts.fail_next_submits(0);
        assert_eq!(scheduler.anchor_round().await.unwrap().anchored.len(), 1);
    }

    #[tokio::test]
    async fn failed_append_is_reported_and_retried_next_round() {
        let unvetted = make_tlog("unvetted", true);
        let vetted_log = Arc::new(InMemoryLogClient::new());
        let vetted = Arc::new(Tlog::new(
            "vetted",
            vetted_log.clone() as Arc<dyn LogClient>,
            Arc::new(InMemoryBlobStore::new()) as Arc<dyn BlobStore>,
            None,
            fast_config(1).retry,
        ));
        let a = make_record(&unvetted).await;
        let b = make_record(&vetted).await;

        let ts = Arc::new(InMemoryTimestamper::new(0));
        let scheduler = AnchorScheduler::new(
            vec![unvetted.clone(), vetted.clone()],
            ts.clone(),
            fast_config(1),
        );

        vetted_log.inject_append_fault(AppendFault::RejectLast);
        let round = scheduler.anchor_round().await.unwrap();
        assert!(!round.is_complete());
        assert_eq!(round.anchored, vec![("unvetted".to_string(), a)]);
        assert_eq!(round.failed, vec![("vetted".to_string(), b)]);
        assert_eq!(last_kind(&unvetted, a).await, LeafKind::Anchor);
        assert_eq!(last_kind(&vetted, b).await, LeafKind::RecordIndex);

        // Only the failed tree is still pending.
        let round = scheduler.anchor_round().await.unwrap();
        assert!(round.is_complete());
        assert_eq!(round.anchored, vec![("vetted".to_string(), b)]);
        assert_eq!(last_kind(&vetted, b).await, LeafKind::Anchor);
        assert_eq!(ts.batch_count(), 2);
    }

    #[tokio::test]
    async fn unconfirmed_batch_leaves_trees_pending() {
        let vetted = make_tlog("vetted", false);
        let tree = make_record(&vetted).await;

        let ts = Arc::new(InMemoryTimestamper::new(10));
        let scheduler = AnchorScheduler::new(vec![vetted.clone()], ts, fast_config(2));

        assert!(scheduler.anchor_round().await.unwrap().is_empty());
        assert_eq!(last_kind(&vetted, tree).await, LeafKind::RecordIndex);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let vetted = make_tlog("vetted", false);
        let scheduler = Arc::new(AnchorScheduler::new(
            vec![vetted],
            Arc::new(InMemoryTimestamper::default()),
            fast_config(1),
        ));
        let cancel = CancellationToken::new();
        let task = {
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: AnchorConfig = serde_json::from_str(r#"{"interval_secs": 60}"#).unwrap();
        assert_eq!(config.interval_secs, 60);
        assert!(config.enabled);
        assert_eq!(config.confirm_attempts, AnchorConfig::default().confirm_attempts);
    }
}
