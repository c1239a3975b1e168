//! Daily message quotas per identity.
//!
//! Token-bucket rate limiting with tier-specific daily capacity and no
//! intra-day refill. Buckets are keyed by (identity, UTC calendar day)
//! and superseded, not mutated, at the midnight boundary: the first
//! request of a new day simply finds no bucket and creates a fresh one.
//!
//! # Atomicity
//!
//! Check-and-consume is a single compare-and-swap against the quota
//! store: a denied caller has consumed nothing, an allowed caller has
//! consumed exactly `cost`, even under concurrent calls for the same
//! identity from multiple devices. Lost races reload and retry.
//!
//! # Failure semantics
//!
//! Storage unavailability is retried with bounded backoff and then
//! fails closed (denied). Silently allowing unlimited messages when the
//! quota store is down would defeat the abuse control.

use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::QuotaConfig,
    env::Environment,
    identity::{Identity, IdentityId},
    storage::{QuotaStore, StorageError},
};

/// CAS retries before treating contention as unavailability.
///
/// Every lost race means some other request made progress, so in
/// practice this bound is never approached; it exists to keep the loop
/// provably finite against a misbehaving store.
const MAX_CAS_ATTEMPTS: u32 = 64;

/// Attempts against an unavailable store before failing closed.
const MAX_STORE_ATTEMPTS: u32 = 3;

/// Initial backoff between store attempts (doubled each retry).
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Per (identity, day) token bucket state.
///
/// # Invariants
///
/// - `tokens_remaining <= capacity` whenever `capacity` is `Some`
/// - `tokens_remaining` never goes negative (unsigned by construction)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaBucket {
    /// Tokens left today
    pub tokens_remaining: u32,
    /// Daily capacity; `None` marks an uncapped bucket
    pub capacity: Option<u32>,
    /// Next UTC midnight, when a fresh bucket supersedes this one
    pub reset_at: DateTime<Utc>,
}

impl QuotaBucket {
    /// A full bucket created at `now`, resetting at the next midnight.
    pub fn fresh(capacity: u32, now: DateTime<Utc>) -> Self {
        Self {
            tokens_remaining: capacity,
            capacity: Some(capacity),
            reset_at: next_midnight(now),
        }
    }
}

/// Storage key for a quota bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// The identity being limited
    pub identity: IdentityId,
    /// UTC calendar day the bucket covers
    pub day: NaiveDate,
}

/// Successful consumption result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaGrant {
    /// Tokens left after this consumption; `None` for uncapped tiers
    pub remaining: Option<u32>,
    /// When the full capacity returns
    pub reset_at: DateTime<Utc>,
}

/// Errors from quota enforcement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    /// Daily quota is exhausted; fully recoverable and user-facing.
    /// Carries `reset_at` so the caller can display a countdown.
    #[error("daily quota exhausted, resets at {reset_at}")]
    Exceeded {
        /// When the quota resets
        reset_at: DateTime<Utc>,
    },

    /// Quota storage could not be reached after bounded retry.
    /// The request fails closed; the caller must deny.
    #[error("quota store unavailable: {0}")]
    StoreUnavailable(String),
}

/// The next UTC midnight strictly after `now`.
pub fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().checked_add_days(Days::new(1)).unwrap_or_else(|| {
        // Unreachable before year 262143; keep today's date rather than panic
        now.date_naive()
    });
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

/// Enforces per-identity daily message quotas.
#[derive(Debug, Clone)]
pub struct RateLimiter<S, E>
where
    S: QuotaStore,
    E: Environment,
{
    store: S,
    env: E,
    config: QuotaConfig,
}

impl<S, E> RateLimiter<S, E>
where
    S: QuotaStore,
    E: Environment,
{
    /// Create a limiter over the given store and tier configuration.
    pub fn new(store: S, env: E, config: QuotaConfig) -> Self {
        Self { store, env, config }
    }

    /// Atomically check and consume `cost` tokens for an identity.
    ///
    /// # Invariants
    ///
    /// - **Post** (Ok): exactly `cost` tokens were consumed
    /// - **Post** (Err): no tokens were consumed
    ///
    /// # Errors
    ///
    /// - [`QuotaError::Exceeded`] when fewer than `cost` tokens remain
    /// - [`QuotaError::StoreUnavailable`] after bounded retry against an
    ///   unreachable store (fail closed)
    pub async fn check_and_consume(
        &self,
        identity: &Identity,
        cost: u32,
    ) -> Result<QuotaGrant, QuotaError> {
        let Some(capacity) = self.config.capacity_for(identity.tier) else {
            // Uncapped tier: nothing to persist, nothing to deny
            return Ok(QuotaGrant { remaining: None, reset_at: next_midnight(self.env.now()) });
        };

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.env.now();
            let key = BucketKey { identity: identity.id.clone(), day: now.date_naive() };

            let loaded = self.load_with_retry(&key).await?;
            let (mut bucket, expected_version) = match loaded {
                // Live bucket for today
                Some(versioned) if now < versioned.bucket.reset_at => {
                    (versioned.bucket, versioned.version)
                },
                // Stale bucket under today's key (clock skew); supersede it
                Some(versioned) => (QuotaBucket::fresh(capacity, now), versioned.version),
                // First request of the day
                None => (QuotaBucket::fresh(capacity, now), 0),
            };

            if bucket.tokens_remaining < cost {
                tracing::info!(
                    identity = %identity.id,
                    tier = ?identity.tier,
                    reset_at = %bucket.reset_at,
                    "quota denied"
                );
                return Err(QuotaError::Exceeded { reset_at: bucket.reset_at });
            }

            bucket.tokens_remaining -= cost;
            debug_assert!(bucket.tokens_remaining <= capacity);

            match self.store_with_retry(&key, &bucket, expected_version).await {
                Ok(()) => {
                    tracing::debug!(
                        identity = %identity.id,
                        remaining = bucket.tokens_remaining,
                        "quota consumed"
                    );
                    return Ok(QuotaGrant {
                        remaining: Some(bucket.tokens_remaining),
                        reset_at: bucket.reset_at,
                    });
                },
                // Lost the race; reload current state and retry
                Err(StorageError::Conflict { .. }) => continue,
                Err(err) => return Err(QuotaError::StoreUnavailable(err.to_string())),
            }
        }

        // A store that conflicts forever is indistinguishable from a
        // broken one; fail closed
        Err(QuotaError::StoreUnavailable("compare-and-swap contention limit reached".to_string()))
    }

    async fn load_with_retry(
        &self,
        key: &BucketKey,
    ) -> Result<Option<crate::storage::VersionedBucket>, QuotaError> {
        let mut backoff = RETRY_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.store.load(key) {
                Ok(loaded) => return Ok(loaded),
                Err(StorageError::Unavailable(reason)) if attempt + 1 < MAX_STORE_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(%reason, attempt, "quota store load failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                },
                Err(err) => return Err(QuotaError::StoreUnavailable(err.to_string())),
            }
        }
    }

    async fn store_with_retry(
        &self,
        key: &BucketKey,
        bucket: &QuotaBucket,
        expected_version: u64,
    ) -> Result<(), StorageError> {
        let mut backoff = RETRY_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.store.store(key, bucket, expected_version) {
                Ok(_) => return Ok(()),
                Err(StorageError::Unavailable(reason)) if attempt + 1 < MAX_STORE_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(%reason, attempt, "quota store write failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                },
                Err(err) => return Err(err),
            }
        }
    }
}
