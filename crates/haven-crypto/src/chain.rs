//! SHA-256 link hashing for the tamper-evident audit chain.
//!
//! Every audit event commits to its predecessor:
//!
//! ```text
//! chain_hash = SHA-256(prev_chain_hash ‖ payload_hash ‖ timestamp ‖ actor)
//! ```
//!
//! Modifying, deleting, or reordering any event changes the recomputed
//! hash for that event and every subsequent one, which the audit log's
//! integrity check detects at the first divergent sequence number.

use sha2::{Digest, Sha256};

/// Sentinel `prev_chain_hash` for the first event in every chain.
///
/// All-zero bytes can never be the SHA-256 of real data, making genesis
/// detection unambiguous.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// SHA-256 hash of an event payload's canonical encoding.
pub fn payload_hash(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Compute the chain hash linking an event to its predecessor.
///
/// The timestamp is hashed as big-endian microseconds since the Unix
/// epoch so the encoding is unambiguous across platforms.
pub fn link_hash(
    prev_chain_hash: &[u8; 32],
    payload_hash: &[u8; 32],
    timestamp_micros: i64,
    actor: &str,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_chain_hash);
    hasher.update(payload_hash);
    hasher.update(timestamp_micros.to_be_bytes());
    hasher.update(actor.as_bytes());
    hasher.finalize().into()
}
