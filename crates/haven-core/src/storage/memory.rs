//! In-memory storage implementation.
//!
//! Backs tests and single-process embeddings. Clones share state via
//! `Arc`, so one `MemoryStore` can serve the rate limiter, audit log,
//! and envelope persistence at once while each component holds its own
//! handle.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use haven_crypto::EncryptedEnvelope;

use super::{AuditStore, EnvelopeStore, QuotaStore, StorageError, VersionedBucket};
use crate::{
    audit::AuditEvent,
    quota::{BucketKey, QuotaBucket},
};

#[derive(Debug, Default)]
struct Inner {
    buckets: Mutex<HashMap<BucketKey, (QuotaBucket, u64)>>,
    events: Mutex<Vec<AuditEvent>>,
    envelopes: Mutex<HashMap<u64, EncryptedEnvelope>>,
}

/// Shared in-memory store implementing every storage trait.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored audit events (for tests and diagnostics).
    pub fn event_count(&self) -> usize {
        lock(&self.inner.events).len()
    }

    /// Number of stored envelopes (for tests and diagnostics).
    pub fn envelope_count(&self) -> usize {
        lock(&self.inner.envelopes).len()
    }

    /// Overwrite a stored audit event in place.
    ///
    /// Deliberately bypasses the append-only discipline so integrity
    /// tests can simulate an attacker editing the backing store.
    pub fn tamper_event(&self, sequence: u64, mutate: impl FnOnce(&mut AuditEvent)) -> bool {
        let mut events = lock(&self.inner.events);
        match events.get_mut(sequence as usize) {
            Some(event) => {
                mutate(event);
                true
            },
            None => false,
        }
    }

    /// Replace a stored envelope in place.
    ///
    /// Like [`MemoryStore::tamper_event`], bypasses the write-once rule
    /// so integrity tests can simulate corruption of the backing store.
    pub fn tamper_envelope(&self, message_id: u64, envelope: &EncryptedEnvelope) -> bool {
        let mut envelopes = lock(&self.inner.envelopes);
        match envelopes.get_mut(&message_id) {
            Some(stored) => {
                *stored = envelope.clone();
                true
            },
            None => false,
        }
    }
}

// A poisoned lock means a writer panicked mid-operation; recovering the
// guard is safe here because every critical section leaves the maps in
// a consistent state before any code that can panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QuotaStore for MemoryStore {
    fn load(&self, key: &BucketKey) -> Result<Option<VersionedBucket>, StorageError> {
        let buckets = lock(&self.inner.buckets);
        Ok(buckets
            .get(key)
            .map(|(bucket, version)| VersionedBucket { bucket: bucket.clone(), version: *version }))
    }

    fn store(
        &self,
        key: &BucketKey,
        bucket: &QuotaBucket,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let mut buckets = lock(&self.inner.buckets);
        let current = buckets.get(key).map_or(0, |(_, version)| *version);

        if current != expected_version {
            return Err(StorageError::Conflict { expected: expected_version, got: current });
        }

        let next = current + 1;
        buckets.insert(key.clone(), (bucket.clone(), next));
        Ok(next)
    }
}

impl AuditStore for MemoryStore {
    fn append(&self, event: &AuditEvent) -> Result<(), StorageError> {
        let mut events = lock(&self.inner.events);
        let expected = events.len() as u64;

        if event.sequence != expected {
            return Err(StorageError::Conflict { expected, got: event.sequence });
        }

        events.push(event.clone());
        Ok(())
    }

    fn latest_sequence(&self) -> Result<Option<u64>, StorageError> {
        let events = lock(&self.inner.events);
        Ok(events.len().checked_sub(1).map(|last| last as u64))
    }

    fn load_range(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>, StorageError> {
        let events = lock(&self.inner.events);
        let start = (from as usize).min(events.len());
        let end = ((to as usize).saturating_add(1)).min(events.len());
        Ok(events[start..end].to_vec())
    }
}

impl EnvelopeStore for MemoryStore {
    fn put(&self, message_id: u64, envelope: &EncryptedEnvelope) -> Result<(), StorageError> {
        let mut envelopes = lock(&self.inner.envelopes);
        if envelopes.contains_key(&message_id) {
            // Envelopes are immutable once written
            return Err(StorageError::Conflict { expected: 0, got: 1 });
        }
        envelopes.insert(message_id, envelope.clone());
        Ok(())
    }

    fn get(&self, message_id: u64) -> Result<Option<EncryptedEnvelope>, StorageError> {
        let envelopes = lock(&self.inner.envelopes);
        Ok(envelopes.get(&message_id).cloned())
    }

    fn remove(&self, message_id: u64) -> Result<(), StorageError> {
        let mut envelopes = lock(&self.inner.envelopes);
        envelopes.remove(&message_id);
        Ok(())
    }
}
