//! Versioned symmetric key material.
//!
//! Keys are issued by the platform credential store and referenced by
//! [`KeyId`]. This crate never persists raw key bytes; envelopes carry
//! only the id of the key that sealed them.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Identifies a key version in the credential store.
///
/// Embedded in every [`EncryptedEnvelope`](crate::EncryptedEnvelope) so
/// that key rotation never breaks decryption of historical messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(pub u32);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key-v{}", self.0)
    }
}

/// A 32-byte symmetric key for XChaCha20-Poly1305.
///
/// Zeroized on drop. Clone only to hand a copy to the AEAD; do not
/// store copies beyond the encryption or decryption call.
#[derive(Clone)]
pub struct KeyMaterial {
    /// The raw key bytes
    bytes: [u8; 32],
}

impl KeyMaterial {
    /// Wrap raw key bytes fetched from the credential store.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// The 32-byte symmetric key.
    pub fn bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl From<[u8; 32]> for KeyMaterial {
    fn from(bytes: [u8; 32]) -> Self {
        Self::new(bytes)
    }
}

// Key bytes must not linger in freed memory
impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key bytes, even in debug output
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}
