//! Pipeline error taxonomy.
//!
//! Recoverable conditions (rate limited, content blocked, encryption
//! failure) are outcomes, not errors; see
//! [`SendOutcome`](crate::pipeline::SendOutcome). This module covers
//! the failures that abort an operation entirely.

use haven_crypto::{IntegrityError, KeyId};
use thiserror::Error;

use crate::audit::AuditError;

/// Failures that abort a pipeline operation.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A backing store was unavailable after retries; the operation is
    /// aborted rather than performed unaudited or unpersisted
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// The audit log refused the required record
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// A stored envelope failed its authentication check
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// An envelope references a key version the credential store does
    /// not hold
    #[error("unknown key version: {key_id}")]
    UnknownKey {
        /// The missing key version
        key_id: KeyId,
    },

    /// No envelope is stored under this message id
    #[error("message {message_id} not found")]
    MessageNotFound {
        /// The requested message id
        message_id: u64,
    },
}

impl PipelineError {
    /// Whether retrying the same operation later could succeed.
    ///
    /// Integrity and unknown-key failures are fatal to the affected
    /// message; store outages and audit backpressure are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PersistenceUnavailable(_) => true,
            Self::Audit(err) => {
                matches!(err, AuditError::StoreUnavailable(_) | AuditError::BufferOverflow { .. })
            },
            Self::Integrity(_) | Self::UnknownKey { .. } | Self::MessageNotFound { .. } => false,
        }
    }
}
