//! Security and integrity layer for a mental-health chat client.
//!
//! Sits between the UI and network/persistence: validates raw message
//! text, enforces per-tier daily quotas, encrypts content at rest, and
//! records every security-relevant decision in a tamper-evident audit
//! chain. The [`pipeline::Pipeline`] coordinator is the only path a
//! message can take, so no stage can be skipped or reordered.
//!
//! # Architecture
//!
//! ```text
//!                         ┌─────────────────────┐
//!            text ──────> │      ContentGate     │──── blocked ────┐
//!                         │ injection / crisis / │                 │
//!                         │  external moderation │                 │
//!                         └──────────┬──────────┘                  │
//!                                    │ allowed                     │
//!                         ┌──────────▼──────────┐                  │
//!                         │      RateLimiter     │──── limited ────┤
//!                         │  per-tier daily CAS  │                 │
//!                         └──────────┬──────────┘                  │
//!                                    │ granted                     │
//!                         ┌──────────▼──────────┐                  │
//!                         │     MessageCipher    │                 │
//!                         │ versioned XChaCha20  │                 │
//!                         └──────────┬──────────┘                  │
//!                                    │ envelope                    │
//!                         ┌──────────▼──────────┐       ┌──────────▼─────────┐
//!                         │    EnvelopeStore     │       │      AuditLog       │
//!                         └─────────────────────┘       │  SHA-256 hash chain │
//!                                                       └────────────────────┘
//! ```
//!
//! Storage, key material, moderation, and crisis escalation are trait
//! seams ([`storage::QuotaStore`], [`storage::AuditStore`],
//! [`storage::EnvelopeStore`], [`cipher::KeyProvider`],
//! [`gate::ModerationClient`], [`pipeline::CrisisNotifier`]); the crate
//! ships in-memory implementations for tests and single-process use.
//! Time and randomness come from [`env::Environment`] so every
//! time-dependent behavior is deterministic under test.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod audit;
pub mod cipher;
pub mod config;
pub mod env;
pub mod error;
pub mod gate;
pub mod identity;
pub mod pipeline;
pub mod quota;
pub mod storage;

pub use audit::{AuditError, AuditEvent, AuditEventKind, AuditLog, SealedLog, TamperDetected};
pub use cipher::{CipherError, KeyProvider, MemoryKeyProvider, MessageCipher};
pub use config::{AuditConfig, GateConfig, ModerationFailurePolicy, QuotaConfig};
pub use env::{Environment, ManualEnv, SystemEnv};
pub use error::PipelineError;
pub use gate::{ContentGate, GateError, GateReason, Severity, Verdict};
pub use identity::{Identity, IdentityId, Tier};
pub use pipeline::{CrisisAlert, CrisisNotifier, Pipeline, SendOutcome};
pub use quota::{QuotaError, QuotaGrant, RateLimiter};
pub use storage::{ChaoticStore, MemoryStore, StorageError};
