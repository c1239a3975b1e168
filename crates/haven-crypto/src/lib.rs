//! Haven Cryptographic Primitives
//!
//! Cryptographic building blocks for the Haven message security core.
//! Pure functions with deterministic outputs. Callers provide random
//! bytes for deterministic testing.
//!
//! # Envelope Lifecycle
//!
//! Message plaintext is sealed into an [`EncryptedEnvelope`] under a
//! versioned symmetric key identified by [`KeyId`]. The envelope embeds
//! the key id so that rotating the active key never breaks decryption
//! of historical messages.
//!
//! ```text
//! Credential Store Key (per KeyId)
//!        │
//!        ▼
//! AEAD Encryption → EncryptedEnvelope { key_id, nonce, ciphertext }
//! ```
//!
//! # Security
//!
//! Confidentiality and Authenticity:
//! - XChaCha20-Poly1305 AEAD provides tamper-proof encryption
//! - 24-byte nonce is caller-supplied random per encryption
//! - Failed authentication tag -> reject envelope, never partial plaintext
//!
//! Key Hygiene:
//! - Raw key material is zeroized on drop
//! - Key material never appears in stored envelopes, only the key id
//!
//! Tamper Evidence:
//! - [`chain`] provides the SHA-256 link hashing used by the audit log;
//!   every event commits to its predecessor, so retroactive edits are
//!   detectable at the first divergent sequence number

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod chain;
pub mod envelope;
pub mod keys;

pub use chain::{GENESIS_HASH, link_hash, payload_hash};
pub use envelope::{
    EncryptedEnvelope, IntegrityError, NONCE_SIZE, decrypt_envelope, encrypt_envelope,
};
pub use keys::{KeyId, KeyMaterial};
