//! Message cipher with versioned keys.
//!
//! Wraps the pure AEAD primitives with key management: the active key
//! id seals new messages, while decryption resolves whatever key id an
//! envelope carries. Rotating the active key therefore never breaks
//! historical messages.
//!
//! Raw key material lives in the platform credential store behind
//! [`KeyProvider`]; this crate never persists key bytes.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use haven_crypto::{
    EncryptedEnvelope, IntegrityError, KeyId, KeyMaterial, NONCE_SIZE, decrypt_envelope,
    encrypt_envelope,
};
use thiserror::Error;

/// Secure credential store seam.
///
/// Supplies symmetric keys by version. Implementations back onto the
/// platform keychain/keystore; [`MemoryKeyProvider`] exists for tests
/// and single-process embeddings.
pub trait KeyProvider: Send + Sync + 'static {
    /// Fetch key material for a version, `None` if the store has no
    /// such key.
    fn fetch(&self, key_id: KeyId) -> Option<KeyMaterial>;
}

/// Errors from cipher operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// The credential store has no key for this version
    #[error("unknown key version: {key_id}")]
    UnknownKey {
        /// The missing key version
        key_id: KeyId,
    },

    /// The envelope failed its authentication check
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Encrypts outgoing messages and verifies/decrypts stored envelopes.
pub struct MessageCipher<P>
where
    P: KeyProvider,
{
    provider: P,
    active: RwLock<KeyId>,
}

impl<P> MessageCipher<P>
where
    P: KeyProvider,
{
    /// Create a cipher sealing new messages under `active`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::UnknownKey`] if the provider cannot
    /// supply the active key; a cipher that cannot encrypt is a
    /// misconfiguration caught at construction.
    pub fn new(provider: P, active: KeyId) -> Result<Self, CipherError> {
        if provider.fetch(active).is_none() {
            return Err(CipherError::UnknownKey { key_id: active });
        }
        Ok(Self { provider, active: RwLock::new(active) })
    }

    /// The key version currently sealing new messages.
    pub fn active_key_id(&self) -> KeyId {
        // KeyId is Copy; a poisoned writer cannot leave it torn
        *self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch new encryptions to a different key version.
    ///
    /// Historical envelopes keep decrypting through their embedded key
    /// id.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::UnknownKey`] if the provider cannot
    /// supply the new key.
    pub fn rotate(&self, new_active: KeyId) -> Result<(), CipherError> {
        if self.provider.fetch(new_active).is_none() {
            return Err(CipherError::UnknownKey { key_id: new_active });
        }
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, new_active)
        };
        tracing::info!(%previous, %new_active, "message key rotated");
        Ok(())
    }

    /// Seal plaintext under the active key.
    ///
    /// The nonce must be fresh random bytes from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::UnknownKey`] if the active key vanished
    /// from the credential store since construction.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        nonce: [u8; NONCE_SIZE],
    ) -> Result<EncryptedEnvelope, CipherError> {
        let key_id = self.active_key_id();
        let key = self.provider.fetch(key_id).ok_or(CipherError::UnknownKey { key_id })?;
        Ok(encrypt_envelope(plaintext, &key, key_id, nonce))
    }

    /// Open an envelope using whatever key version it was sealed under.
    ///
    /// # Errors
    ///
    /// - [`CipherError::UnknownKey`] if the envelope's key version is
    ///   not in the credential store
    /// - [`CipherError::Integrity`] on tag mismatch; fatal to this
    ///   envelope only, and must be surfaced, never swallowed
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CipherError> {
        let key = self
            .provider
            .fetch(envelope.key_id)
            .ok_or(CipherError::UnknownKey { key_id: envelope.key_id })?;
        Ok(decrypt_envelope(envelope, &key)?)
    }
}

/// In-memory key provider for tests and single-process embeddings.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyProvider {
    keys: Arc<RwLock<HashMap<KeyId, [u8; 32]>>>,
}

impl MemoryKeyProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register key material under a version.
    pub fn insert(&self, key_id: KeyId, bytes: [u8; 32]) {
        self.keys.write().unwrap_or_else(PoisonError::into_inner).insert(key_id, bytes);
    }
}

impl KeyProvider for MemoryKeyProvider {
    fn fetch(&self, key_id: KeyId) -> Option<KeyMaterial> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key_id)
            .map(|bytes| KeyMaterial::new(*bytes))
    }
}
