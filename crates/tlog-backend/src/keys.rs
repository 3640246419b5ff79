//! Key files.
//!
//! The encryption key file holds 32 raw bytes; the identity key file holds
//! the hex-encoded Ed25519 secret. Either is created with fresh random
//! material when absent and is written with owner-only permissions.

use std::fs;
use std::io::Write;
use std::path::Path;

use tlog_crypto::{EncryptionKey, SigningKey, KEY_LEN};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{BackendError, BackendResult};

pub fn load_or_create_encryption_key(path: &Path) -> BackendResult<EncryptionKey> {
    if path.exists() {
        let raw = Zeroizing::new(fs::read(path)?);
        return EncryptionKey::from_slice(&raw)
            .map_err(|e| BackendError::KeyFile(format!("{}: {e}", path.display())));
    }
    let (key, raw) = EncryptionKey::generate();
    write_private(path, raw.as_ref())?;
    info!(path = %path.display(), bytes = KEY_LEN, "encryption key created");
    Ok(key)
}

pub fn load_or_create_identity(path: &Path) -> BackendResult<SigningKey> {
    if path.exists() {
        let text = Zeroizing::new(fs::read_to_string(path)?);
        return SigningKey::from_hex(text.trim())
            .map_err(|e| BackendError::KeyFile(format!("{}: {e}", path.display())));
    }
    let key = SigningKey::generate();
    let text = Zeroizing::new(hex::encode(key.as_bytes()));
    write_private(path, text.as_bytes())?;
    info!(
        path = %path.display(),
        public_key = %key.verifying_key().to_hex(),
        "identity key created"
    );
    Ok(key)
}

fn write_private(path: &Path, contents: &[u8]) -> BackendResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}
