//! Property and concurrency tests for the quota layer.

use std::sync::Arc;

use chrono::{TimeZone, Timelike, Utc};
use haven_core::{
    Identity, ManualEnv, QuotaConfig, QuotaError, RateLimiter, Tier,
    quota::next_midnight,
    storage::MemoryStore,
};
use proptest::prelude::*;
use tokio::task::JoinSet;

fn limiter_with_capacity(capacity: u32) -> RateLimiter<MemoryStore, ManualEnv> {
    let env = ManualEnv::at(Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).single().unwrap());
    let config = QuotaConfig { free_daily: capacity, ..QuotaConfig::default() };
    RateLimiter::new(MemoryStore::new(), env, config)
}

proptest! {
    /// No interleaving of sequential consumes ever grants more than the
    /// configured capacity, and every denial reports the same reset
    /// instant.
    #[test]
    fn successes_never_exceed_capacity(capacity in 1u32..=40, attempts in 0usize..=80) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        rt.block_on(async {
            let limiter = limiter_with_capacity(capacity);
            let identity = Identity::new("prop-user", Tier::Free);

            let mut successes = 0usize;
            for _ in 0..attempts {
                match limiter.check_and_consume(&identity, 1).await {
                    Ok(grant) => {
                        successes += 1;
                        prop_assert!(grant.remaining.unwrap() < capacity);
                    },
                    Err(QuotaError::Exceeded { reset_at }) => {
                        prop_assert_eq!(reset_at.time().num_seconds_from_midnight(), 0);
                    },
                    Err(err) => return Err(TestCaseError::fail(err.to_string())),
                }
            }

            prop_assert_eq!(successes, attempts.min(capacity as usize));
            Ok(())
        })?;
    }

    /// The reset instant is always the next UTC midnight: strictly in
    /// the future, at most 24 hours away, at 00:00:00.
    #[test]
    fn reset_is_next_utc_midnight(secs in 0i64..=3_000_000_000) {
        let now = Utc.timestamp_opt(secs, 0).single().unwrap();
        let reset = next_midnight(now);

        prop_assert!(reset > now);
        prop_assert!(reset - now <= chrono::Duration::hours(24));
        prop_assert_eq!(reset.time().num_seconds_from_midnight(), 0);
    }
}

/// Concurrent consumes against one bucket grant exactly the capacity,
/// never more: the compare-and-swap store write is the serialization
/// point.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumes_grant_exactly_capacity() {
    const CAPACITY: u32 = 10;
    const CALLERS: u32 = 40;

    let limiter = Arc::new(limiter_with_capacity(CAPACITY));
    let identity = Identity::new("contended-user", Tier::Free);

    let mut tasks = JoinSet::new();
    for _ in 0..CALLERS {
        let limiter = Arc::clone(&limiter);
        let identity = identity.clone();
        tasks.spawn(async move { limiter.check_and_consume(&identity, 1).await });
    }

    let mut granted = 0u32;
    let mut denied = 0u32;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => granted += 1,
            Err(QuotaError::Exceeded { .. }) => denied += 1,
            Err(err) => panic!("unexpected quota error: {err}"),
        }
    }

    assert_eq!(granted, CAPACITY);
    assert_eq!(denied, CALLERS - CAPACITY);
}
