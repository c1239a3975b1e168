//! End-to-end pipeline scenarios: gate, quota, cipher, audit, and
//! crisis escalation working together against in-memory stores.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use haven_core::{
    AuditConfig, AuditEventKind, AuditLog, ContentGate, CrisisAlert, CrisisNotifier, GateConfig,
    GateReason, Identity, ManualEnv, MemoryKeyProvider, MessageCipher, Pipeline, PipelineError,
    QuotaConfig, RateLimiter, SendOutcome, Severity, Tier,
    storage::{AuditStore, ChaoticStore, EnvelopeStore, MemoryStore},
};
use haven_crypto::KeyId;

type TestPipeline = Pipeline<ManualEnv, MemoryKeyProvider, MemoryStore, MemoryStore, MemoryStore>;

fn build_pipeline() -> (TestPipeline, MemoryStore, ManualEnv) {
    let env = ManualEnv::at(Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).single().unwrap());
    let store = MemoryStore::new();

    let provider = MemoryKeyProvider::new();
    provider.insert(KeyId(1), [0x11; 32]);
    provider.insert(KeyId(2), [0x22; 32]);

    let pipeline = Pipeline::new(
        env.clone(),
        ContentGate::new(&GateConfig::default()).unwrap(),
        RateLimiter::new(store.clone(), env.clone(), QuotaConfig::default()),
        MessageCipher::new(provider, KeyId(1)).unwrap(),
        AuditLog::open(store.clone(), env.clone(), AuditConfig::default()).unwrap(),
        store.clone(),
    );

    (pipeline, store, env)
}

fn events_of_kind(store: &MemoryStore, kind: AuditEventKind) -> usize {
    let Some(last) = store.latest_sequence().unwrap() else {
        return 0;
    };
    store
        .load_range(0, last)
        .unwrap()
        .iter()
        .filter(|event| event.kind == kind)
        .count()
}

#[derive(Default)]
struct CountingNotifier {
    calls: AtomicUsize,
}

#[async_trait]
impl CrisisNotifier for CountingNotifier {
    async fn notify(&self, alert: CrisisAlert) {
        assert_eq!(alert.severity, Severity::Critical);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A guest sends their eleventh message of the day: the first ten
/// deliver, the eleventh is rate limited with the reset at the next UTC
/// midnight, and the denial is audited.
#[tokio::test]
async fn guest_eleventh_message_is_rate_limited() {
    let (pipeline, store, _env) = build_pipeline();
    let guest = Identity::new("guest-7", Tier::Guest);

    for sent in 1..=10u32 {
        let outcome = pipeline.send_message(&guest, "just checking in").await.unwrap();
        match outcome {
            SendOutcome::Delivered { remaining, .. } => {
                assert_eq!(remaining, Some(10 - sent));
            },
            other => panic!("message {sent} should deliver, got {other:?}"),
        }
    }

    let outcome = pipeline.send_message(&guest, "one more").await.unwrap();
    let expected_reset = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).single().unwrap();
    assert_eq!(outcome, SendOutcome::RateLimited { reset_at: expected_reset });

    assert_eq!(events_of_kind(&store, AuditEventKind::Recorded), 10);
    assert_eq!(events_of_kind(&store, AuditEventKind::QuotaDenied), 1);
}

/// Crisis language delivers normally but raises exactly one escalation
/// and lands a crisis event in the audit chain.
#[tokio::test]
async fn crisis_language_delivers_and_escalates_once() {
    let (pipeline, store, _env) = build_pipeline();
    let notifier = Arc::new(CountingNotifier::default());
    let pipeline = pipeline.with_crisis_notifier(notifier.clone());
    let user = Identity::new("user-3", Tier::Free);

    let outcome =
        pipeline.send_message(&user, "lately I feel like there is no reason to live").await.unwrap();

    assert!(matches!(outcome, SendOutcome::Delivered { .. }));
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(events_of_kind(&store, AuditEventKind::CrisisFlagged), 1);
    assert_eq!(events_of_kind(&store, AuditEventKind::Recorded), 1);
}

/// Injection-shaped input is blocked before the rate limiter: nothing
/// is persisted and no token is consumed.
#[tokio::test]
async fn injection_is_blocked_without_consuming_quota() {
    let (pipeline, store, _env) = build_pipeline();
    let guest = Identity::new("guest-9", Tier::Guest);

    let outcome = pipeline.send_message(&guest, "'; DROP TABLE users; --").await.unwrap();
    assert_eq!(
        outcome,
        SendOutcome::ContentBlocked { reasons: vec![GateReason::InjectionDetected] }
    );
    assert_eq!(events_of_kind(&store, AuditEventKind::ContentBlocked), 1);

    // The full guest allowance is still available afterwards
    for _ in 0..10 {
        let outcome = pipeline.send_message(&guest, "an ordinary message").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered { .. }));
    }
}

/// Key rotation: messages sealed before the rotation stay readable via
/// their embedded key version while new messages use the new key.
#[tokio::test]
async fn rotation_preserves_old_messages() {
    let (pipeline, store, _env) = build_pipeline();
    let user = Identity::new("user-5", Tier::Free);

    let SendOutcome::Delivered { message_id: old_id, .. } =
        pipeline.send_message(&user, "written before rotation").await.unwrap()
    else {
        panic!("first message should deliver");
    };

    pipeline.cipher().rotate(KeyId(2)).unwrap();

    let SendOutcome::Delivered { message_id: new_id, .. } =
        pipeline.send_message(&user, "written after rotation").await.unwrap()
    else {
        panic!("second message should deliver");
    };

    assert_eq!(store.get(old_id).unwrap().unwrap().key_id, KeyId(1));
    assert_eq!(store.get(new_id).unwrap().unwrap().key_id, KeyId(2));

    assert_eq!(pipeline.read_message(&user, old_id).unwrap(), "written before rotation");
    assert_eq!(pipeline.read_message(&user, new_id).unwrap(), "written after rotation");
}

/// A tampered envelope fails authentication on read; the failure is
/// surfaced to the caller and recorded in the audit chain.
#[tokio::test]
async fn tampered_envelope_is_surfaced_and_audited() {
    let (pipeline, store, _env) = build_pipeline();
    let user = Identity::new("user-2", Tier::Free);

    let SendOutcome::Delivered { message_id, .. } =
        pipeline.send_message(&user, "private reflection").await.unwrap()
    else {
        panic!("message should deliver");
    };

    let mut envelope = store.get(message_id).unwrap().unwrap();
    envelope.ciphertext[0] ^= 0x01;
    assert!(store.tamper_envelope(message_id, &envelope));

    assert!(matches!(
        pipeline.read_message(&user, message_id),
        Err(PipelineError::Integrity(_))
    ));
    assert_eq!(events_of_kind(&store, AuditEventKind::DecryptFailed), 1);

    // The audit chain itself still verifies: the envelope was tampered,
    // not the log
    let last = store.latest_sequence().unwrap().unwrap();
    pipeline.audit().verify_integrity(0, last).unwrap();
}

/// Reading an id that was never written is a clean not-found, not an
/// integrity failure.
#[tokio::test]
async fn missing_message_is_not_found() {
    let (pipeline, _store, _env) = build_pipeline();
    let user = Identity::new("user-1", Tier::Free);

    assert!(matches!(
        pipeline.read_message(&user, 0xDEAD_BEEF),
        Err(PipelineError::MessageNotFound { message_id: 0xDEAD_BEEF })
    ));
}

/// Once the audit log is frozen after tamper detection, sends are
/// denied: no unaudited delivery.
#[tokio::test]
async fn frozen_audit_log_denies_sends() {
    let (pipeline, store, _env) = build_pipeline();
    let user = Identity::new("user-8", Tier::Free);

    for _ in 0..3 {
        pipeline.send_message(&user, "an ordinary message").await.unwrap();
    }

    assert!(store.tamper_event(1, |event| event.detail = "rewritten".to_string()));
    assert!(pipeline.audit().verify_integrity(0, 2).is_err());
    assert!(pipeline.audit().is_frozen());

    assert!(matches!(
        pipeline.send_message(&user, "another message").await,
        Err(PipelineError::Audit(_))
    ));
}

/// When the audit log refuses the delivery record, the already
/// persisted envelope is backed out: a denied send leaves nothing in
/// the envelope store, so a retry cannot duplicate it.
#[tokio::test]
async fn audit_refusal_backs_out_the_envelope() {
    let env = ManualEnv::at(Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).single().unwrap());
    let store = MemoryStore::new();
    let audit_store = ChaoticStore::reliable(MemoryStore::new());

    let provider = MemoryKeyProvider::new();
    provider.insert(KeyId(1), [0x11; 32]);

    let pipeline = Pipeline::new(
        env.clone(),
        ContentGate::new(&GateConfig::default()).unwrap(),
        RateLimiter::new(store.clone(), env.clone(), QuotaConfig::default()),
        MessageCipher::new(provider, KeyId(1)).unwrap(),
        AuditLog::open(audit_store.clone(), env.clone(), AuditConfig { buffer_threshold: 0 })
            .unwrap(),
        store.clone(),
    );
    let user = Identity::new("user-6", Tier::Free);

    audit_store.set_outage(true);

    assert!(matches!(
        pipeline.send_message(&user, "an ordinary message").await,
        Err(PipelineError::Audit(_))
    ));
    assert_eq!(store.envelope_count(), 0);

    // With the store back, the same send delivers and persists exactly
    // one envelope
    audit_store.set_outage(false);
    assert_eq!(pipeline.audit().flush(), 0);
    let outcome = pipeline.send_message(&user, "an ordinary message").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Delivered { .. }));
    assert_eq!(store.envelope_count(), 1);
}

/// The daily quota returns in full at the next UTC midnight.
#[tokio::test]
async fn quota_returns_at_midnight() {
    let (pipeline, _store, env) = build_pipeline();
    let guest = Identity::new("guest-4", Tier::Guest);

    for _ in 0..10 {
        pipeline.send_message(&guest, "an ordinary message").await.unwrap();
    }
    assert!(matches!(
        pipeline.send_message(&guest, "over the line").await.unwrap(),
        SendOutcome::RateLimited { .. }
    ));

    env.set_now(Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 1).single().unwrap());

    let SendOutcome::Delivered { remaining, .. } =
        pipeline.send_message(&guest, "a new day").await.unwrap()
    else {
        panic!("expected delivery after the reset");
    };
    assert_eq!(remaining, Some(9));
}
