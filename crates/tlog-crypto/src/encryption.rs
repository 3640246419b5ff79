use std::sync::RwLock;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::Zeroizing;

/// Envelope magic. Blobs starting with these bytes are sealed.
const MAGIC: &[u8; 4] = b"tlbe";
const VERSION_LEN: usize = 4;
const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = MAGIC.len() + VERSION_LEN;

/// Length of a raw encryption key.
pub const KEY_LEN: usize = 32;

/// Process-wide symmetric key used to seal unvetted blobs.
///
/// Envelope layout:
///
/// ```text
/// "tlbe" | version (u32 BE) | nonce (24) | ciphertext + tag
/// ```
///
/// The header is bound as associated data, so the key version cannot be
/// altered without failing authentication.
///
/// Encrypt and decrypt hold the read lock. [`EncryptionKey::zero`] takes the
/// write lock, which waits for in-flight operations, and wipes the key; any
/// later use fails with [`EncryptionError::KeyZeroed`].
pub struct EncryptionKey {
    key: RwLock<Option<Zeroizing<[u8; KEY_LEN]>>>,
}

impl EncryptionKey {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: RwLock::new(Some(Zeroizing::new(key))),
        }
    }

    /// Generate a new random key.
    pub fn generate() -> (Self, Zeroizing<[u8; KEY_LEN]>) {
        let mut raw = Zeroizing::new([0u8; KEY_LEN]);
        rand::thread_rng().fill_bytes(raw.as_mut());
        (Self::new(*raw), raw)
    }

    /// Build from key file contents, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EncryptionError> {
        let raw: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| EncryptionError::InvalidKeyLength(bytes.len()))?;
        Ok(Self::new(raw))
    }

    /// Whether `blob` carries the sealed envelope header.
    pub fn is_encrypted(blob: &[u8]) -> bool {
        blob.len() >= HEADER_LEN + NONCE_LEN && blob.starts_with(MAGIC)
    }

    /// Seal `plaintext`, tagging the envelope with the key `version`.
    pub fn encrypt(&self, version: u32, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let guard = self.key.read().map_err(|_| EncryptionError::KeyZeroed)?;
        let key = guard.as_ref().ok_or(EncryptionError::KeyZeroed)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_ref()));

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + plaintext.len() + 16);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&version.to_be_bytes());
        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &out[..HEADER_LEN],
                },
            )
            .map_err(|_| EncryptionError::SealFailed)?;
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a sealed blob, returning the plaintext and its key version.
    pub fn decrypt(&self, blob: &[u8]) -> Result<(Vec<u8>, u32), EncryptionError> {
        if !Self::is_encrypted(blob) {
            return Err(EncryptionError::NotEncrypted);
        }
        let guard = self.key.read().map_err(|_| EncryptionError::KeyZeroed)?;
        let key = guard.as_ref().ok_or(EncryptionError::KeyZeroed)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_ref()));

        let (header, rest) = blob.split_at(HEADER_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let mut version = [0u8; VERSION_LEN];
        version.copy_from_slice(&header[MAGIC.len()..]);

        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: header,
                },
            )
            .map_err(|_| EncryptionError::OpenFailed)?;
        Ok((plaintext, u32::from_be_bytes(version)))
    }

    /// Wipe the key. Blocks until no encrypt/decrypt is in flight.
    pub fn zero(&self) {
        let mut guard = match self.key.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }

    pub fn is_zeroed(&self) -> bool {
        match self.key.read() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("zeroed", &self.is_zeroed())
            .finish()
    }
}

/// Errors from encryption at rest.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption key has been zeroed")]
    KeyZeroed,
    #[error("invalid encryption key length: expected 32, got {0}")]
    InvalidKeyLength(usize),
    #[error("blob is not an encryption envelope")]
    NotEncrypted,
    #[error("failed to seal blob")]
    SealFailed,
    #[error("failed to open blob: wrong key or tampered data")]
    OpenFailed,
}
