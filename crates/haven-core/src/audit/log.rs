//! The tamper-evident audit log.
//!
//! # Architecture
//!
//! The log is the sole writer to the event chain. Chain hashes must be
//! computed in strict order, so appends serialize on a single tail
//! mutex: sequence assignment, hash linking, and the store write all
//! happen inside one critical section. No I/O here is async, so the
//! lock is never held across an await point.
//!
//! # Failure semantics
//!
//! Audit writes are a security control, not a convenience log. When the
//! store is down, fully hashed events buffer in memory and are retried
//! in order on later appends or an explicit [`AuditLog::flush`]. If the
//! buffer exceeds its configured threshold the append fails, which
//! callers treat as fatal to the affected request path: deny rather
//! than proceed unaudited.
//!
//! Detected tampering freezes the log; further appends fail until an
//! operator calls [`AuditLog::unfreeze`] after investigation.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use haven_crypto::GENESIS_HASH;
use thiserror::Error;

use super::event::{AuditEvent, AuditEventKind, SealedLog};
use crate::{config::AuditConfig, env::Environment, identity::IdentityId, storage::AuditStore};

/// The chain failed verification.
///
/// Reported at the first sequence number whose recomputed hashes or
/// ordering diverge from the stored values. Never silently recovered;
/// operators must investigate before the log accepts further writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("audit chain tamper detected at sequence {first_bad_sequence}")]
pub struct TamperDetected {
    /// First sequence number that fails verification
    pub first_bad_sequence: u64,
}

/// Errors from audit log operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// The log is frozen after tamper detection
    #[error("audit log is frozen pending investigation")]
    Frozen,

    /// The in-memory buffer exceeded its threshold without a successful
    /// flush; the affected request must be denied
    #[error("audit buffer overflow: {buffered} events pending")]
    BufferOverflow {
        /// Events currently awaiting persistence
        buffered: usize,
    },

    /// Chain verification failed
    #[error(transparent)]
    Tamper(#[from] TamperDetected),

    /// Audit storage could not be reached
    #[error("audit store unavailable: {0}")]
    StoreUnavailable(String),

    /// Event payload could not be canonically encoded
    #[error("audit serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug)]
struct Tail {
    next_sequence: u64,
    prev_chain_hash: [u8; 32],
    buffer: VecDeque<AuditEvent>,
    frozen: bool,
}

/// Append-only, hash-chained record of security decisions.
#[derive(Debug)]
pub struct AuditLog<S, E>
where
    S: AuditStore,
    E: Environment,
{
    store: S,
    env: E,
    config: AuditConfig,
    tail: Mutex<Tail>,
}

impl<S, E> AuditLog<S, E>
where
    S: AuditStore,
    E: Environment,
{
    /// Open the log, resuming the chain from the stored tail.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::StoreUnavailable`] if the tail cannot be
    /// read.
    pub fn open(store: S, env: E, config: AuditConfig) -> Result<Self, AuditError> {
        let (next_sequence, prev_chain_hash) = match store
            .latest_sequence()
            .map_err(|err| AuditError::StoreUnavailable(err.to_string()))?
        {
            None => (0, GENESIS_HASH),
            Some(latest) => {
                let events = store
                    .load_range(latest, latest)
                    .map_err(|err| AuditError::StoreUnavailable(err.to_string()))?;
                let tail_event = events.last().ok_or_else(|| {
                    AuditError::StoreUnavailable(format!("tail event {latest} missing"))
                })?;
                (latest + 1, tail_event.chain_hash)
            },
        };

        Ok(Self {
            store,
            env,
            config,
            tail: Mutex::new(Tail {
                next_sequence,
                prev_chain_hash,
                buffer: VecDeque::new(),
                frozen: false,
            }),
        })
    }

    // The tail state is repaired by construction on every operation, so
    // recovering a poisoned guard cannot observe a broken invariant.
    fn lock_tail(&self) -> MutexGuard<'_, Tail> {
        self.tail.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and return its assigned sequence number.
    ///
    /// The returned sequence is committed to the chain even if the
    /// event is still buffered awaiting persistence.
    ///
    /// # Errors
    ///
    /// - [`AuditError::Frozen`] after tamper detection
    /// - [`AuditError::BufferOverflow`] when persistence has been down
    ///   long enough that continuing would lose events; the caller must
    ///   deny the request
    pub fn append(
        &self,
        kind: AuditEventKind,
        actor: &IdentityId,
        detail: &str,
    ) -> Result<u64, AuditError> {
        let mut tail = self.lock_tail();

        if tail.frozen {
            return Err(AuditError::Frozen);
        }

        // Older buffered events must land first to keep store order
        Self::drain_buffer(&self.store, &mut tail);

        let event = AuditEvent::build(
            tail.next_sequence,
            self.env.now(),
            actor.clone(),
            kind,
            detail,
            tail.prev_chain_hash,
        )?;

        let sequence = event.sequence;
        tail.next_sequence += 1;
        tail.prev_chain_hash = event.chain_hash;

        if tail.buffer.is_empty() {
            match self.store.append(&event) {
                Ok(()) => {
                    tracing::trace!(sequence, kind = ?kind, actor = %event.actor, "audit event persisted");
                    return Ok(sequence);
                },
                Err(err) => {
                    tracing::warn!(sequence, error = %err, "audit store append failed, buffering");
                    tail.buffer.push_back(event);
                },
            }
        } else {
            tail.buffer.push_back(event);
        }

        if tail.buffer.len() > self.config.buffer_threshold {
            tracing::error!(
                buffered = tail.buffer.len(),
                threshold = self.config.buffer_threshold,
                "audit buffer overflow, denying request path"
            );
            return Err(AuditError::BufferOverflow { buffered: tail.buffer.len() });
        }

        Ok(sequence)
    }

    fn drain_buffer(store: &S, tail: &mut Tail) {
        while let Some(front) = tail.buffer.front() {
            match store.append(front) {
                Ok(()) => {
                    tracing::debug!(sequence = front.sequence, "buffered audit event flushed");
                    tail.buffer.pop_front();
                },
                Err(err) => {
                    tracing::warn!(
                        sequence = front.sequence,
                        error = %err,
                        "audit flush still failing"
                    );
                    break;
                },
            }
        }
    }

    /// Retry persisting buffered events; returns how many remain.
    pub fn flush(&self) -> usize {
        let mut tail = self.lock_tail();
        Self::drain_buffer(&self.store, &mut tail);
        tail.buffer.len()
    }

    /// Events currently buffered awaiting persistence.
    pub fn pending(&self) -> usize {
        self.lock_tail().buffer.len()
    }

    /// Whether appends are currently refused after tamper detection.
    pub fn is_frozen(&self) -> bool {
        self.lock_tail().frozen
    }

    /// Operator acknowledgment after investigating a tamper report.
    pub fn unfreeze(&self) {
        self.lock_tail().frozen = false;
        tracing::warn!("audit log unfrozen by operator");
    }

    /// Verify the stored chain over `[from, to]` inclusive.
    ///
    /// Recomputes every hash and checks sequence continuity. Any
    /// modified, deleted, or reordered event is reported at the first
    /// divergent sequence number, and the log freezes against further
    /// appends.
    ///
    /// # Errors
    ///
    /// - [`AuditError::Tamper`] at the first bad sequence
    /// - [`AuditError::StoreUnavailable`] if events cannot be loaded
    pub fn verify_integrity(&self, from: u64, to: u64) -> Result<(), AuditError> {
        let mut prev = if from == 0 {
            GENESIS_HASH
        } else {
            let events = self
                .store
                .load_range(from - 1, from - 1)
                .map_err(|err| AuditError::StoreUnavailable(err.to_string()))?;
            match events.last() {
                Some(event) => event.chain_hash,
                // Predecessor missing entirely: the chain is broken here
                None => return self.report_tamper(from),
            }
        };

        let events = self
            .store
            .load_range(from, to)
            .map_err(|err| AuditError::StoreUnavailable(err.to_string()))?;

        let mut expected_sequence = from;
        for event in &events {
            let intact = event.sequence == expected_sequence
                && event.prev_chain_hash == prev
                && event.payload_hash == event.recomputed_payload_hash()?
                && event.chain_hash == event.recomputed_chain_hash();

            if !intact {
                return self.report_tamper(expected_sequence);
            }

            prev = event.chain_hash;
            expected_sequence += 1;
        }

        Ok(())
    }

    fn report_tamper(&self, first_bad_sequence: u64) -> Result<(), AuditError> {
        tracing::error!(first_bad_sequence, "audit chain tamper detected, freezing log");
        self.lock_tail().frozen = true;
        Err(TamperDetected { first_bad_sequence }.into())
    }

    /// Export the persisted chain as a sealed snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::StoreUnavailable`] if events cannot be
    /// loaded.
    pub fn export(&self) -> Result<SealedLog, AuditError> {
        let latest = self
            .store
            .latest_sequence()
            .map_err(|err| AuditError::StoreUnavailable(err.to_string()))?;

        let events = match latest {
            None => Vec::new(),
            Some(latest) => self
                .store
                .load_range(0, latest)
                .map_err(|err| AuditError::StoreUnavailable(err.to_string()))?,
        };

        let terminal_hash = events.last().map_or(GENESIS_HASH, |event| event.chain_hash);

        Ok(SealedLog { events, finalized_at: self.env.now(), terminal_hash })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        env::ManualEnv,
        storage::{ChaoticStore, MemoryStore},
    };

    fn env() -> ManualEnv {
        ManualEnv::at(Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).single().unwrap())
    }

    fn actor(id: &str) -> IdentityId {
        IdentityId::from(id)
    }

    #[test]
    fn appends_are_sequential_and_linked() {
        let store = MemoryStore::new();
        let log = AuditLog::open(store.clone(), env(), AuditConfig::default()).unwrap();

        let first = log.append(AuditEventKind::Recorded, &actor("user-1"), "message_id=1").unwrap();
        let second = log.append(AuditEventKind::QuotaDenied, &actor("user-2"), "").unwrap();

        assert_eq!((first, second), (0, 1));

        let events = store.load_range(0, 1).unwrap();
        assert_eq!(events[0].prev_chain_hash, GENESIS_HASH);
        assert_eq!(events[1].prev_chain_hash, events[0].chain_hash);
    }

    #[test]
    fn verify_succeeds_on_untouched_log() {
        let log = AuditLog::open(MemoryStore::new(), env(), AuditConfig::default()).unwrap();

        for i in 0..5 {
            log.append(AuditEventKind::Recorded, &actor("user-1"), &format!("message_id={i}"))
                .unwrap();
        }

        assert_eq!(log.verify_integrity(0, 4), Ok(()));
    }

    #[test]
    fn mutated_event_is_detected_and_freezes_the_log() {
        let store = MemoryStore::new();
        let log = AuditLog::open(store.clone(), env(), AuditConfig::default()).unwrap();

        for i in 0..5 {
            log.append(AuditEventKind::Recorded, &actor("user-1"), &format!("message_id={i}"))
                .unwrap();
        }

        assert!(store.tamper_event(2, |event| event.detail = "message_id=999".to_string()));

        let result = log.verify_integrity(0, 4);
        assert_eq!(result, Err(TamperDetected { first_bad_sequence: 2 }.into()));

        assert!(log.is_frozen());
        assert_eq!(
            log.append(AuditEventKind::Recorded, &actor("user-1"), ""),
            Err(AuditError::Frozen)
        );

        log.unfreeze();
        assert!(log.append(AuditEventKind::Recorded, &actor("user-1"), "").is_ok());
    }

    #[test]
    fn reordered_hash_is_detected_at_first_divergence() {
        let store = MemoryStore::new();
        let log = AuditLog::open(store.clone(), env(), AuditConfig::default()).unwrap();

        for i in 0..4 {
            log.append(AuditEventKind::Recorded, &actor("user-1"), &format!("message_id={i}"))
                .unwrap();
        }

        store.tamper_event(1, |event| event.chain_hash[0] ^= 0x01);

        assert_eq!(
            log.verify_integrity(0, 3),
            Err(TamperDetected { first_bad_sequence: 1 }.into())
        );
    }

    #[test]
    fn outage_buffers_then_flushes_in_order() {
        let store = ChaoticStore::reliable(MemoryStore::new());
        let log = AuditLog::open(store.clone(), env(), AuditConfig::default()).unwrap();

        log.append(AuditEventKind::Recorded, &actor("user-1"), "message_id=0").unwrap();

        store.set_outage(true);
        log.append(AuditEventKind::Recorded, &actor("user-1"), "message_id=1").unwrap();
        log.append(AuditEventKind::Recorded, &actor("user-1"), "message_id=2").unwrap();
        assert_eq!(log.pending(), 2);

        store.set_outage(false);
        assert_eq!(log.flush(), 0);

        let events = store.inner().load_range(0, 2).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(log.verify_integrity(0, 2), Ok(()));
    }

    #[test]
    fn buffer_overflow_fails_the_request_path() {
        let store = ChaoticStore::reliable(MemoryStore::new());
        let log =
            AuditLog::open(store.clone(), env(), AuditConfig { buffer_threshold: 2 }).unwrap();

        store.set_outage(true);
        log.append(AuditEventKind::Recorded, &actor("user-1"), "").unwrap();
        log.append(AuditEventKind::Recorded, &actor("user-1"), "").unwrap();

        let overflow = log.append(AuditEventKind::Recorded, &actor("user-1"), "");
        assert_eq!(overflow, Err(AuditError::BufferOverflow { buffered: 3 }));
    }

    #[test]
    fn export_seals_with_terminal_hash() {
        let store = MemoryStore::new();
        let log = AuditLog::open(store.clone(), env(), AuditConfig::default()).unwrap();

        for i in 0..3 {
            log.append(AuditEventKind::Recorded, &actor("user-1"), &format!("message_id={i}"))
                .unwrap();
        }

        let sealed = log.export().unwrap();
        assert_eq!(sealed.events.len(), 3);
        assert_eq!(sealed.terminal_hash, sealed.events[2].chain_hash);
    }

    #[test]
    fn log_resumes_chain_across_restarts() {
        let store = MemoryStore::new();
        {
            let log = AuditLog::open(store.clone(), env(), AuditConfig::default()).unwrap();
            log.append(AuditEventKind::Recorded, &actor("user-1"), "message_id=0").unwrap();
        }

        let reopened = AuditLog::open(store.clone(), env(), AuditConfig::default()).unwrap();
        reopened.append(AuditEventKind::Recorded, &actor("user-1"), "message_id=1").unwrap();

        assert_eq!(reopened.verify_integrity(0, 1), Ok(()));
    }
}
