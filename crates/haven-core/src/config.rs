//! Configuration for the security pipeline.
//!
//! This core is a library; the embedding application constructs these
//! structs directly (no config-file parsing here). Every knob left to
//! product decisions lives here with a documented default.

use std::time::Duration;

use crate::{
    gate::filters::{DEFAULT_CRISIS_KEYWORDS, DEFAULT_INJECTION_PATTERNS},
    identity::Tier,
};

/// Per-tier daily message capacities.
///
/// Defaults are provisional pending product confirmation: guest 10/day,
/// free 50/day, premium uncapped. Buckets do not refill intra-day; the
/// full capacity returns at the next UTC midnight.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Daily cap for guest identities
    pub guest_daily: u32,
    /// Daily cap for free accounts
    pub free_daily: u32,
    /// Daily cap for premium accounts; `None` means uncapped
    pub premium_daily: Option<u32>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { guest_daily: 10, free_daily: 50, premium_daily: None }
    }
}

impl QuotaConfig {
    /// Capacity for a tier; `None` means uncapped.
    pub fn capacity_for(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::Guest => Some(self.guest_daily),
            Tier::Free => Some(self.free_daily),
            Tier::Premium => self.premium_daily,
        }
    }
}

/// Behavior when the external moderation service times out or errors.
///
/// This is an explicit product decision, not an implementation detail:
/// fail-closed blocks the message when moderation cannot be consulted,
/// fail-open lets it through with the outage recorded in the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationFailurePolicy {
    /// Proceed permissively when moderation is unavailable
    FailOpen,
    /// Deny the message when moderation is unavailable
    FailClosed,
}

/// Content gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Injection-shape regexes; a match blocks the message outright
    pub injection_patterns: Vec<String>,
    /// Crisis phrases; a match flags but never blocks
    pub crisis_keywords: Vec<String>,
    /// Upper bound on the external moderation call
    pub moderation_timeout: Duration,
    /// What to do when moderation is down
    pub moderation_policy: ModerationFailurePolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            injection_patterns: DEFAULT_INJECTION_PATTERNS.iter().map(ToString::to_string).collect(),
            crisis_keywords: DEFAULT_CRISIS_KEYWORDS.iter().map(ToString::to_string).collect(),
            moderation_timeout: Duration::from_secs(2),
            // A mental-health product must not silently pass unscreened
            // content while the screen is down
            moderation_policy: ModerationFailurePolicy::FailClosed,
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Maximum events buffered in memory while persistence is down.
    /// Exceeding this denies the affected request path rather than
    /// proceeding unaudited.
    pub buffer_threshold: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { buffer_threshold: 64 }
    }
}
