use serde::{Deserialize, Serialize};
use tlog_crypto::{Signature, SigningKey, VerifyingKey};

use crate::error::{PluginError, PluginResult};

/// Length of a command challenge in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// A plugin command as submitted by a caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCommand {
    /// Hex-encoded random challenge the server signs in its reply.
    pub challenge: String,
    /// Plugin id.
    pub id: String,
    pub command: String,
    /// Caller-chosen id echoed back in the reply.
    pub command_id: String,
    /// JSON-encoded command payload.
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCommandReply {
    pub id: String,
    pub command: String,
    pub command_id: String,
    /// JSON-encoded command reply.
    pub payload: String,
    /// Hex-encoded server signature over the challenge bytes.
    pub response: String,
}

/// A fresh random challenge, hex encoded.
pub fn new_challenge() -> String {
    hex::encode(rand::random::<[u8; CHALLENGE_LEN]>())
}

/// Decode a challenge, which must be exactly [`CHALLENGE_LEN`] bytes.
pub fn decode_challenge(challenge: &str) -> PluginResult<[u8; CHALLENGE_LEN]> {
    let bytes = hex::decode(challenge).map_err(|e| PluginError::InvalidChallenge(e.to_string()))?;
    bytes.as_slice().try_into().map_err(|_| {
        PluginError::InvalidChallenge(format!(
            "expected {CHALLENGE_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Sign a decoded challenge.
pub fn challenge_response(identity: &SigningKey, challenge: &[u8; CHALLENGE_LEN]) -> String {
    identity.sign(challenge).to_hex()
}

/// Check that `response` is the server's signature over `challenge`.
pub fn verify_challenge(server: &VerifyingKey, challenge: &str, response: &str) -> PluginResult<()> {
    let challenge = decode_challenge(challenge)?;
    let signature = Signature::from_hex(response)
        .map_err(|e| PluginError::InvalidChallenge(format!("response: {e}")))?;
    server
        .verify(&challenge, &signature)
        .map_err(|e| PluginError::InvalidChallenge(format!("response: {e}")))
}
