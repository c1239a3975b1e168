//! Storage error types.
//!
//! Defines errors that can occur against the persistence collaborator:
//! - `Conflict`: compare-and-swap lost or audit sequence gap
//! - `NotFound`: requested record doesn't exist
//! - `Serialization`: failed to encode/decode a stored record
//! - `Unavailable`: the backing store cannot be reached

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Version or sequence conflict (lost compare-and-swap, or a gap in
    /// the audit sequence)
    ///
    /// For quota buckets this means a concurrent writer updated the
    /// record first; the caller reloads and retries. For audit events
    /// it means an append at other than the next sequence, which would
    /// break the hash chain.
    #[error("version conflict: expected {expected}, got {got}")]
    Conflict {
        /// Version or sequence the caller expected
        expected: u64,
        /// Version or sequence actually present
        got: u64,
    },

    /// Requested record doesn't exist
    #[error("record not found: {key}")]
    NotFound {
        /// Human-readable key of the missing record
        key: String,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing store is unreachable (network, disk, lock poisoning)
    ///
    /// Transient from the store's perspective; callers retry with
    /// bounded backoff and then fail closed.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns true if this error may succeed on retry.
    ///
    /// Conflicts are retried by reloading current state; unavailability
    /// is retried with backoff. Missing records and corrupt encodings
    /// never resolve on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}
