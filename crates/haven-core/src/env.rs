//! Environment abstraction for deterministic testing.
//!
//! Decouples pipeline logic from system resources (wall clock, entropy).
//! Production code uses [`SystemEnv`]; tests use [`ManualEnv`] with a
//! settable clock so calendar-day quota resets can be exercised without
//! waiting for midnight.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use haven_crypto::NONCE_SIZE;
use rand::RngCore;

/// Abstract environment providing wall-clock time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` reflects server time, never client-supplied time (quota
///   resets are clock-manipulation sensitive)
/// - `random_bytes()` uses cryptographically secure entropy in
///   production (nonces must be unpredictable)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current server time (UTC).
    fn now(&self) -> DateTime<Utc>;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a fresh 24-byte AEAD nonce.
    fn nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        self.random_bytes(&mut nonce);
        nonce
    }

    /// Generates a random `u64`, used for message ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Production environment: system clock and OS entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}

/// Test environment with a manually controlled clock.
///
/// Clones share the same clock, so advancing time on one handle is
/// visible to every component holding a clone. Randomness still comes
/// from the thread RNG; tests that need fixed nonces call the crypto
/// layer directly.
#[derive(Debug, Clone)]
pub struct ManualEnv {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualEnv {
    /// Create an environment frozen at the given instant.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    /// Move the clock to a new instant.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += delta;
    }
}

impl Environment for ManualEnv {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}
