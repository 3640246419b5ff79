//! Cryptographic primitives for the trust log backend.
//!
//! Provides SHA-256 hashing in two tree shapes, Ed25519 signing/verification,
//! and symmetric encryption of blobs at rest:
//!
//! - [`LogHasher`] -- RFC 6962 leaf/node hashing used by the append-only log
//! - [`MerkleTree`] -- classical SHA-256 merkle root over content digests, the
//!   value a submitter's client verifies against the censorship record
//! - [`SigningKey`] / [`VerifyingKey`] / [`Signature`] -- Ed25519 identity
//! - [`EncryptionKey`] -- XChaCha20-Poly1305 key with a versioned envelope
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod encryption;
pub mod hasher;
pub mod merkle;
pub mod signer;

pub use encryption::{EncryptionError, EncryptionKey, KEY_LEN};
pub use hasher::LogHasher;
pub use merkle::{MerkleProof, MerkleTree, Side};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
