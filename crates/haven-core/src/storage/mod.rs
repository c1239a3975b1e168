//! Storage abstraction for the security pipeline.
//!
//! Trait-based seams to the persistence collaborator, one per record
//! family: quota buckets (versioned compare-and-swap), audit events
//! (sequence-checked append-only), and encrypted envelopes (immutable
//! create/read). Traits are synchronous; the pipeline never holds a
//! lock across an await point.

mod chaos;
mod error;
mod memory;

pub use chaos::ChaoticStore;
pub use error::StorageError;
use haven_crypto::EncryptedEnvelope;
pub use memory::MemoryStore;

use crate::{
    audit::AuditEvent,
    quota::{BucketKey, QuotaBucket},
};

/// A quota bucket together with its storage version.
#[derive(Debug, Clone)]
pub struct VersionedBucket {
    /// The bucket state
    pub bucket: QuotaBucket,
    /// Storage version, starts at 1 on first write
    pub version: u64,
}

/// Quota bucket storage with versioned compare-and-swap.
///
/// The version makes check-and-consume atomic across workers: two
/// writers racing on the same bucket cannot both win, so a token is
/// never double-spent and a denial never consumes anything.
///
/// # Clone Semantics
///
/// Implementations typically share internal state via Arc, meaning
/// clones access the same underlying storage.
pub trait QuotaStore: Clone + Send + Sync + 'static {
    /// Load the bucket for an (identity, day) key.
    ///
    /// Returns `None` if no bucket exists yet for that day.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the store is unreachable.
    fn load(&self, key: &BucketKey) -> Result<Option<VersionedBucket>, StorageError>;

    /// Store a bucket if the version still matches.
    ///
    /// `expected_version` 0 means the record must not exist yet.
    /// Returns the new version on success.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another writer got there
    /// first; the caller reloads and retries.
    fn store(
        &self,
        key: &BucketKey,
        bucket: &QuotaBucket,
        expected_version: u64,
    ) -> Result<u64, StorageError>;
}

/// Append-only audit event storage.
///
/// # Clone Semantics
///
/// Implementations typically share internal state via Arc, meaning
/// clones access the same underlying storage.
pub trait AuditStore: Clone + Send + Sync + 'static {
    /// Append an event at its assigned sequence number.
    ///
    /// # Invariants
    ///
    /// - **Pre**: `event.sequence` must be exactly one past the latest
    ///   stored sequence (or 0 for an empty log)
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a sequence gap, which would
    /// break the hash chain.
    fn append(&self, event: &AuditEvent) -> Result<(), StorageError>;

    /// Latest stored sequence number, `None` for an empty log.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the store is unreachable.
    fn latest_sequence(&self) -> Result<Option<u64>, StorageError>;

    /// Load events with sequence in `[from, to]` inclusive, in order.
    ///
    /// Returns fewer events if the range extends past the log tail.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the store is unreachable.
    fn load_range(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>, StorageError>;
}

/// Immutable encrypted envelope storage.
///
/// Envelopes are written once at send time and never mutated, so no
/// versioning is needed.
///
/// # Clone Semantics
///
/// Implementations typically share internal state via Arc, meaning
/// clones access the same underlying storage.
pub trait EnvelopeStore: Clone + Send + Sync + 'static {
    /// Persist an envelope under its message id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the message id is already
    /// taken (envelopes are immutable once written).
    fn put(&self, message_id: u64, envelope: &EncryptedEnvelope) -> Result<(), StorageError>;

    /// Fetch an envelope by message id, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the store is unreachable.
    fn get(&self, message_id: u64) -> Result<Option<EncryptedEnvelope>, StorageError>;

    /// Delete an envelope by message id.
    ///
    /// Only used to back out a write whose audit record was refused; a
    /// delivered message is never removed. Removing an absent id is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the store is unreachable.
    fn remove(&self, message_id: u64) -> Result<(), StorageError>;
}
