//! Message encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - random bytes must be provided by the caller.
//! This enables deterministic testing and keeps the crate free of
//! entropy-source assumptions.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{KeyId, KeyMaterial};

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Decryption rejected the envelope.
///
/// Raised when the authentication tag does not match the ciphertext,
/// i.e. the envelope was tampered with or decrypted under the wrong
/// key. Never recoverable for the affected envelope; callers must
/// surface it, not substitute empty content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("integrity check failed for {key_id}: {reason}")]
pub struct IntegrityError {
    /// Key version the envelope claims it was sealed under
    pub key_id: KeyId,
    /// Reason the envelope was rejected
    pub reason: String,
}

/// An immutable encrypted record for one message.
///
/// Created once at send time and never mutated. Decryption with the
/// wrong key, nonce, ciphertext, or tag fails closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Key version that sealed this envelope
    pub key_id: KeyId,
    /// The 24-byte `XChaCha20` nonce, unique per encryption under a key
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(POLY1305_TAG_SIZE)
    }
}

/// Seal plaintext into an [`EncryptedEnvelope`] under a versioned key.
///
/// # Security
///
/// - Caller MUST provide a cryptographically random nonce in production
/// - Nonce reuse under the same key breaks confidentiality; the 24-byte
///   width makes random collision negligible
/// - The returned envelope embeds `key_id`, never the key itself
pub fn encrypt_envelope(
    plaintext: &[u8],
    key: &KeyMaterial,
    key_id: KeyId,
    nonce: [u8; NONCE_SIZE],
) -> EncryptedEnvelope {
    let cipher = XChaCha20Poly1305::new(key.bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    EncryptedEnvelope { key_id, nonce, ciphertext }
}

/// Open an [`EncryptedEnvelope`] and return the plaintext.
///
/// # Errors
///
/// - [`IntegrityError`]: authentication tag mismatch (tampered
///   ciphertext, tampered nonce, or wrong key)
pub fn decrypt_envelope(
    envelope: &EncryptedEnvelope,
    key: &KeyMaterial,
) -> Result<Vec<u8>, IntegrityError> {
    let cipher = XChaCha20Poly1305::new(key.bytes().into());
    let nonce = XNonce::from_slice(&envelope.nonce);

    cipher.decrypt(nonce, envelope.ciphertext.as_slice()).map_err(|_| IntegrityError {
        key_id: envelope.key_id,
        reason: "authentication failed".to_string(),
    })
}
