//! Audit event and sealed log types.
//!
//! An [`AuditEvent`] is one entry in the hash chain: it wraps the
//! security decision (kind, actor, detail) with sequence numbering and
//! the SHA-256 hashes that make tampering detectable. A [`SealedLog`]
//! is the exported snapshot whose terminal hash is a compact commitment
//! to the whole chain.

use chrono::{DateTime, Utc};
use haven_crypto::{link_hash, payload_hash};
use serde::{Deserialize, Serialize};

use super::log::AuditError;
use crate::identity::IdentityId;

/// Classification of a security-relevant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// Message passed every stage and was persisted
    Recorded,
    /// Rate limiter denied the message
    QuotaDenied,
    /// Content gate blocked the message
    ContentBlocked,
    /// Crisis language detected (message still proceeded)
    CrisisFlagged,
    /// Envelope failed its integrity check on read
    DecryptFailed,
    /// Encryption could not produce an envelope
    EncryptFailed,
}

/// A single entry in the audit hash chain.
///
/// Append-only and globally ordered by `sequence`. Each event commits
/// to its predecessor through `prev_chain_hash`; mutating any field of
/// any event breaks verification for that event and all subsequent
/// ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic position in the chain, starting at 0
    pub sequence: u64,
    /// Server time the event was appended
    pub timestamp: DateTime<Utc>,
    /// Identity the event is attributed to
    pub actor: IdentityId,
    /// What happened
    pub kind: AuditEventKind,
    /// Free-form context (reasons, message id); hashed into
    /// `payload_hash`, never message plaintext
    pub detail: String,
    /// SHA-256 of the canonical CBOR encoding of (kind, detail)
    pub payload_hash: [u8; 32],
    /// `chain_hash` of the previous event, or the genesis sentinel
    pub prev_chain_hash: [u8; 32],
    /// SHA-256 over (prev_chain_hash ‖ payload_hash ‖ timestamp ‖ actor)
    pub chain_hash: [u8; 32],
}

#[derive(Serialize)]
struct Payload<'a> {
    kind: AuditEventKind,
    detail: &'a str,
}

impl AuditEvent {
    /// Build a fully hashed event linked to `prev_chain_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialization`] if the payload cannot be
    /// canonically encoded.
    pub fn build(
        sequence: u64,
        timestamp: DateTime<Utc>,
        actor: IdentityId,
        kind: AuditEventKind,
        detail: &str,
        prev_chain_hash: [u8; 32],
    ) -> Result<Self, AuditError> {
        let payload = encode_payload(kind, detail)?;
        let payload_hash = payload_hash(&payload);
        let chain_hash =
            link_hash(&prev_chain_hash, &payload_hash, timestamp.timestamp_micros(), &actor.0);

        Ok(Self {
            sequence,
            timestamp,
            actor,
            kind,
            detail: detail.to_string(),
            payload_hash,
            prev_chain_hash,
            chain_hash,
        })
    }

    /// Recompute the payload hash from the stored kind and detail.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialization`] if the payload cannot be
    /// canonically encoded.
    pub fn recomputed_payload_hash(&self) -> Result<[u8; 32], AuditError> {
        Ok(payload_hash(&encode_payload(self.kind, &self.detail)?))
    }

    /// Recompute the chain hash from the stored fields.
    pub fn recomputed_chain_hash(&self) -> [u8; 32] {
        link_hash(
            &self.prev_chain_hash,
            &self.payload_hash,
            self.timestamp.timestamp_micros(),
            &self.actor.0,
        )
    }
}

fn encode_payload(kind: AuditEventKind, detail: &str) -> Result<Vec<u8>, AuditError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&Payload { kind, detail }, &mut bytes)
        .map_err(|err| AuditError::Serialization(err.to_string()))?;
    Ok(bytes)
}

/// An exported snapshot of the audit chain.
///
/// `terminal_hash` is the `chain_hash` of the last event and commits to
/// the entire log; operators can compare it across exports to detect
/// retroactive edits without re-walking the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedLog {
    /// All persisted events in chain order
    pub events: Vec<AuditEvent>,
    /// When the snapshot was taken
    pub finalized_at: DateTime<Utc>,
    /// `chain_hash` of the last event; genesis sentinel if empty
    pub terminal_hash: [u8; 32],
}

impl SealedLog {
    /// Encode the snapshot as CBOR for operator inspection or archival.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialization`] on encoding failure.
    pub fn to_cbor(&self) -> Result<Vec<u8>, AuditError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| AuditError::Serialization(err.to_string()))?;
        Ok(bytes)
    }
}
