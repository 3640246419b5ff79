use serde::{Deserialize, Serialize};
use tlog_client::{LogRoot, VerifyDigest};
use tlog_types::TreeId;

use crate::error::{TlogError, TlogResult};

/// Proof that a tree's root existed at a point in time, as attested by the
/// external timestamp service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub tree_id: TreeId,
    /// JSON-encoded log root that was timestamped, as signed by the log.
    pub log_root: Vec<u8>,
    pub verify_digest: VerifyDigest,
}

impl Anchor {
    pub fn log_root(&self) -> TlogResult<LogRoot> {
        LogRoot::from_bytes(&self.log_root).map_err(|e| TlogError::Corrupt {
            tree: self.tree_id,
            reason: format!("anchor log root: {e}"),
        })
    }
}
