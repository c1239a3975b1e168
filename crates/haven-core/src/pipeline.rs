//! Pipeline coordinator: the single ordered path for outgoing messages.
//!
//! Every message moves through fixed stages, and no stage can be
//! skipped or reordered by callers:
//!
//! ```text
//! Received ──> ContentChecked ──> RateChecked ──> Encrypted ──> Persisted ──> Delivered
//!      │              │                │               │             │
//!      │              ▼                ▼               ▼             ▼
//!      │        ContentBlocked    RateLimited    EncryptionFailed   Err
//!      │              │                │               │
//!      └──────────────┴────────────────┴───────────────┴──> audit trail
//! ```
//!
//! The gate runs before the quota check so blocked content never costs
//! a token. Every terminal state, success or denial, lands in the audit
//! chain; when the audit log itself refuses the record, the operation
//! is denied rather than performed unaudited.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use haven_crypto::EncryptedEnvelope;

use crate::{
    audit::{AuditEventKind, AuditLog},
    cipher::{CipherError, KeyProvider, MessageCipher},
    env::Environment,
    error::PipelineError,
    gate::{ContentGate, GateReason, Severity, Verdict},
    identity::{Identity, IdentityId},
    quota::{QuotaError, RateLimiter},
    storage::{AuditStore, EnvelopeStore, QuotaStore, StorageError},
};

/// Attempts to find an unused message id before giving up.
const MAX_ID_ATTEMPTS: u32 = 4;

/// Terminal state of a send attempt.
///
/// Denials are values, not errors: a caller cannot mistake a blocked or
/// rate-limited message for a delivered one, and cannot observe a
/// half-delivered state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was encrypted, persisted, and audited
    Delivered {
        /// Id under which the envelope is stored
        message_id: u64,
        /// Tokens left today, `None` for uncapped tiers
        remaining: Option<u32>,
    },
    /// The daily quota is exhausted; nothing was persisted
    RateLimited {
        /// When the quota resets (next UTC midnight)
        reset_at: DateTime<Utc>,
    },
    /// The gate blocked the content; no token was consumed
    ContentBlocked {
        /// Which filters fired, in filter order
        reasons: Vec<GateReason>,
    },
    /// Encryption failed; nothing was persisted. Fatal for this message
    EncryptionFailed,
}

/// Escalation raised when crisis language is detected.
///
/// Carries no message text; the receiving side decides what resources
/// to surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrisisAlert {
    /// Who wrote the flagged message
    pub identity: IdentityId,
    /// When the gate flagged it
    pub timestamp: DateTime<Utc>,
    /// Verdict severity, always [`Severity::Critical`] today
    pub severity: Severity,
}

/// Receives crisis escalations.
///
/// Notification is best effort and must not block delivery; the durable
/// record is the audit chain, which is written before the notifier runs.
#[async_trait]
pub trait CrisisNotifier: Send + Sync {
    /// Handle one escalation.
    async fn notify(&self, alert: CrisisAlert);
}

/// Orders the gate, limiter, cipher, and audit log into one flow.
pub struct Pipeline<E, P, Q, A, V>
where
    E: Environment,
    P: KeyProvider,
    Q: QuotaStore,
    A: AuditStore,
    V: EnvelopeStore,
{
    env: E,
    gate: ContentGate,
    limiter: RateLimiter<Q, E>,
    cipher: MessageCipher<P>,
    audit: AuditLog<A, E>,
    envelopes: V,
    crisis_notifier: Option<Arc<dyn CrisisNotifier>>,
}

impl<E, P, Q, A, V> Pipeline<E, P, Q, A, V>
where
    E: Environment,
    P: KeyProvider,
    Q: QuotaStore,
    A: AuditStore,
    V: EnvelopeStore,
{
    /// Assemble a pipeline from its stages.
    pub fn new(
        env: E,
        gate: ContentGate,
        limiter: RateLimiter<Q, E>,
        cipher: MessageCipher<P>,
        audit: AuditLog<A, E>,
        envelopes: V,
    ) -> Self {
        Self { env, gate, limiter, cipher, audit, envelopes, crisis_notifier: None }
    }

    /// Attach a crisis escalation receiver.
    #[must_use]
    pub fn with_crisis_notifier(mut self, notifier: Arc<dyn CrisisNotifier>) -> Self {
        self.crisis_notifier = Some(notifier);
        self
    }

    /// The audit log, for operator verification and export.
    pub fn audit(&self) -> &AuditLog<A, E> {
        &self.audit
    }

    /// The cipher, for key rotation.
    pub fn cipher(&self) -> &MessageCipher<P> {
        &self.cipher
    }

    /// Run one message through the full pipeline.
    ///
    /// Stage order is gate, quota, encrypt, persist, audit; a denial at
    /// any stage consumes nothing downstream of it.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::PersistenceUnavailable`] when the envelope
    ///   store rejects the write after retries; the quota token is
    ///   already spent and is not refunded
    /// - [`PipelineError::Audit`] when a required audit record is
    ///   refused; the operation is denied rather than left unaudited,
    ///   and a just-persisted envelope is backed out
    pub async fn send_message(
        &self,
        identity: &Identity,
        text: &str,
    ) -> Result<SendOutcome, PipelineError> {
        let verdict = self.gate.validate(text).await;

        if verdict.crisis_detected() {
            self.escalate_crisis(identity, &verdict).await?;
        }

        if !verdict.allowed {
            tracing::info!(identity = %identity.id, reasons = ?verdict.reasons, "message blocked");
            self.audit.append(
                AuditEventKind::ContentBlocked,
                &identity.id,
                &format!("reasons={:?}", verdict.reasons),
            )?;
            return Ok(SendOutcome::ContentBlocked { reasons: verdict.reasons });
        }

        let grant = match self.limiter.check_and_consume(identity, 1).await {
            Ok(grant) => grant,
            Err(QuotaError::Exceeded { reset_at }) => {
                tracing::info!(identity = %identity.id, %reset_at, "daily quota exhausted");
                self.audit.append(
                    AuditEventKind::QuotaDenied,
                    &identity.id,
                    &format!("reset_at={reset_at}"),
                )?;
                return Ok(SendOutcome::RateLimited { reset_at });
            },
            Err(QuotaError::StoreUnavailable(cause)) => {
                return Err(PipelineError::PersistenceUnavailable(cause));
            },
        };

        let envelope = match self.cipher.encrypt(text.as_bytes(), self.env.nonce()) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::error!(identity = %identity.id, %err, "encryption failed");
                self.audit.append(AuditEventKind::EncryptFailed, &identity.id, &err.to_string())?;
                return Ok(SendOutcome::EncryptionFailed);
            },
        };

        let message_id = self.persist_envelope(&envelope)?;

        let recorded = self.audit.append(
            AuditEventKind::Recorded,
            &identity.id,
            &format!("message_id={message_id} key_id={}", envelope.key_id),
        );
        if let Err(err) = recorded {
            // An envelope whose audit record was refused must not stay
            // persisted; a retried send would otherwise duplicate it
            if let Err(remove_err) = self.envelopes.remove(message_id) {
                tracing::error!(
                    message_id,
                    error = %remove_err,
                    "could not back out envelope after audit refusal"
                );
            }
            return Err(err.into());
        }
        tracing::debug!(identity = %identity.id, message_id, "message delivered");

        Ok(SendOutcome::Delivered { message_id, remaining: grant.remaining })
    }

    /// Fetch, verify, and decrypt a stored message.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MessageNotFound`] when no envelope is stored
    ///   under `message_id`
    /// - [`PipelineError::Integrity`] when authentication fails; the
    ///   failure is audited and never silently swallowed
    /// - [`PipelineError::UnknownKey`] when the envelope's key version
    ///   is missing from the credential store; also audited
    /// - [`PipelineError::PersistenceUnavailable`] when the envelope
    ///   store is unreachable
    pub fn read_message(
        &self,
        identity: &Identity,
        message_id: u64,
    ) -> Result<String, PipelineError> {
        let envelope = match self.envelopes.get(message_id) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Err(PipelineError::MessageNotFound { message_id }),
            Err(err) => return Err(PipelineError::PersistenceUnavailable(err.to_string())),
        };

        let plaintext = match self.cipher.decrypt(&envelope) {
            Ok(plaintext) => plaintext,
            Err(err) => return Err(self.audit_decrypt_failure(identity, message_id, err)?),
        };

        String::from_utf8(plaintext).map_err(|_| {
            // AEAD passed but the payload is not the UTF-8 we sealed;
            // treat as corruption of this envelope
            PipelineError::Integrity(haven_crypto::IntegrityError {
                key_id: envelope.key_id,
                reason: "decrypted payload is not valid UTF-8".to_string(),
            })
        })
    }

    async fn escalate_crisis(
        &self,
        identity: &Identity,
        verdict: &Verdict,
    ) -> Result<(), PipelineError> {
        tracing::warn!(identity = %identity.id, "crisis language flagged, escalating");
        self.audit.append(
            AuditEventKind::CrisisFlagged,
            &identity.id,
            &format!("severity={:?}", verdict.severity),
        )?;
        if let Some(notifier) = &self.crisis_notifier {
            notifier
                .notify(CrisisAlert {
                    identity: identity.id.clone(),
                    timestamp: self.env.now(),
                    severity: verdict.severity,
                })
                .await;
        }
        Ok(())
    }

    /// Store the envelope under a fresh random id, retrying on id
    /// collision.
    fn persist_envelope(&self, envelope: &EncryptedEnvelope) -> Result<u64, PipelineError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let message_id = self.env.random_u64();
            match self.envelopes.put(message_id, envelope) {
                Ok(()) => return Ok(message_id),
                Err(StorageError::Conflict { .. }) => continue,
                Err(err) => return Err(PipelineError::PersistenceUnavailable(err.to_string())),
            }
        }
        Err(PipelineError::PersistenceUnavailable("message id space exhausted".to_string()))
    }

    /// Record a decrypt failure in the audit chain, then hand back the
    /// pipeline error for the caller to surface.
    fn audit_decrypt_failure(
        &self,
        identity: &Identity,
        message_id: u64,
        err: CipherError,
    ) -> Result<PipelineError, PipelineError> {
        tracing::error!(identity = %identity.id, message_id, %err, "decrypt failed");
        self.audit.append(
            AuditEventKind::DecryptFailed,
            &identity.id,
            &format!("message_id={message_id} {err}"),
        )?;
        Ok(match err {
            CipherError::UnknownKey { key_id } => PipelineError::UnknownKey { key_id },
            CipherError::Integrity(inner) => PipelineError::Integrity(inner),
        })
    }
}
