//! Tamper-evident audit log.
//!
//! Records every security-relevant decision — quota denials, content
//! blocks, crisis flags, decrypt failures, successful deliveries — as a
//! linear SHA-256 hash chain. Each event commits to its predecessor, so
//! a single mutated, deleted, or reordered event fails verification for
//! itself and everything after it.

pub mod event;
pub mod log;

pub use event::{AuditEvent, AuditEventKind, SealedLog};
pub use log::{AuditError, AuditLog, TamperDetected};
