//! Fault-injecting storage wrapper for chaos tests.
//!
//! Wraps any store and makes operations fail with
//! `StorageError::Unavailable`, either on a seeded random schedule or
//! under an explicit outage toggle. Used to verify the fail-closed
//! paths: quota denial on persistence loss and audit buffering with
//! bounded overflow.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use haven_crypto::EncryptedEnvelope;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{AuditStore, EnvelopeStore, QuotaStore, StorageError, VersionedBucket};
use crate::{
    audit::AuditEvent,
    quota::{BucketKey, QuotaBucket},
};

#[derive(Debug)]
struct Shared {
    rng: std::sync::Mutex<StdRng>,
    failure_rate: f64,
    outage: AtomicBool,
    forced_failures: AtomicU32,
}

/// Storage wrapper that injects `Unavailable` failures.
#[derive(Debug, Clone)]
pub struct ChaoticStore<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> ChaoticStore<S> {
    /// Wrap a store with a seeded random failure rate in `[0.0, 1.0]`.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            shared: Arc::new(Shared {
                rng: std::sync::Mutex::new(StdRng::seed_from_u64(seed)),
                failure_rate,
                outage: AtomicBool::new(false),
                forced_failures: AtomicU32::new(0),
            }),
        }
    }

    /// Wrap a store that only fails during an explicit outage.
    pub fn reliable(inner: S) -> Self {
        Self::with_seed(inner, 0.0, 0)
    }

    /// Force every operation to fail until cleared.
    pub fn set_outage(&self, down: bool) {
        self.shared.outage.store(down, Ordering::SeqCst);
    }

    /// Fail exactly the next `count` operations, then recover.
    ///
    /// Deterministic counterpart to `failure_rate`, for tests pinning
    /// down retry budgets.
    pub fn fail_next(&self, count: u32) {
        self.shared.forced_failures.store(count, Ordering::SeqCst);
    }

    /// The wrapped store, for oracle checks that must bypass the chaos.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn roll(&self) -> Result<(), StorageError> {
        if self.shared.outage.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected outage".to_string()));
        }
        let forced = self
            .shared
            .forced_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1));
        if forced.is_ok() {
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        let mut rng = self.shared.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if rng.gen_bool(self.shared.failure_rate.clamp(0.0, 1.0)) {
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

impl<S: QuotaStore> QuotaStore for ChaoticStore<S> {
    fn load(&self, key: &BucketKey) -> Result<Option<VersionedBucket>, StorageError> {
        self.roll()?;
        self.inner.load(key)
    }

    fn store(
        &self,
        key: &BucketKey,
        bucket: &QuotaBucket,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        self.roll()?;
        self.inner.store(key, bucket, expected_version)
    }
}

impl<S: AuditStore> AuditStore for ChaoticStore<S> {
    fn append(&self, event: &AuditEvent) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.append(event)
    }

    fn latest_sequence(&self) -> Result<Option<u64>, StorageError> {
        self.roll()?;
        self.inner.latest_sequence()
    }

    fn load_range(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>, StorageError> {
        self.roll()?;
        self.inner.load_range(from, to)
    }
}

impl<S: EnvelopeStore> EnvelopeStore for ChaoticStore<S> {
    fn put(&self, message_id: u64, envelope: &EncryptedEnvelope) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.put(message_id, envelope)
    }

    fn get(&self, message_id: u64) -> Result<Option<EncryptedEnvelope>, StorageError> {
        self.roll()?;
        self.inner.get(message_id)
    }

    fn remove(&self, message_id: u64) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.remove(message_id)
    }
}
