//! Content gate: validates raw text before it enters the pipeline.
//!
//! Runs ordered filters over every outgoing message:
//!
//! 1. Injection patterns — a match blocks outright; the content never
//!    reaches the rate limiter or the cipher
//! 2. Crisis keywords — a match flags but never blocks; the pipeline
//!    escalates to crisis resources while the message proceeds
//! 3. Optional external moderation — bounded timeout, with an explicit
//!    configurable fail-open/fail-closed outage policy
//!
//! The gate runs before quota consumption so rejected or malicious
//! input never costs the user a token.

pub(crate) mod filters;
mod moderation;

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use self::filters::{CrisisDetector, InjectionFilter};
pub use self::moderation::{ModerationClient, ModerationError, ModerationResponse};
use crate::config::{GateConfig, ModerationFailurePolicy};

/// Why the gate flagged or blocked a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateReason {
    /// Text matched an injection pattern; blocked
    InjectionDetected,
    /// Text matched crisis language; flagged, not blocked
    CrisisDetected,
    /// The moderation service flagged the text; blocked
    ModerationFlagged,
    /// The moderation service was unreachable or timed out; outcome
    /// depends on the configured failure policy
    ModerationUnavailable,
}

/// How serious the verdict is, used for crisis escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Nothing noteworthy
    Routine,
    /// Adversarial or policy-flagged content
    Elevated,
    /// Crisis language; escalate to crisis resources
    Critical,
}

/// The gate's decision for one message.
///
/// Transient: owned by the pipeline coordinator and persisted only in
/// the audit trail. `allowed = false` is a terminal block; callers can
/// never treat a denial as success by accident because delivery
/// requires the full outcome type, not a nullable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the message may proceed
    pub allowed: bool,
    /// Everything the filters found, in filter order
    pub reasons: Vec<GateReason>,
    /// Highest severity across matched filters
    pub severity: Severity,
}

impl Verdict {
    /// Whether crisis language was detected (escalate, don't block).
    pub fn crisis_detected(&self) -> bool {
        self.reasons.contains(&GateReason::CrisisDetected)
    }
}

/// Gate construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// A configured injection pattern failed to compile. Construction
    /// fails rather than silently running with a hole in the filter.
    #[error("invalid injection pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

/// Validates and filters raw message text.
pub struct ContentGate {
    injection: InjectionFilter,
    crisis: CrisisDetector,
    moderation: Option<Arc<dyn ModerationClient>>,
    moderation_timeout: Duration,
    moderation_policy: ModerationFailurePolicy,
}

impl ContentGate {
    /// Build a gate from configuration, without external moderation.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidPattern`] if any injection pattern
    /// fails to compile.
    pub fn new(config: &GateConfig) -> Result<Self, GateError> {
        Ok(Self {
            injection: InjectionFilter::compile(&config.injection_patterns)?,
            crisis: CrisisDetector::new(&config.crisis_keywords),
            moderation: None,
            moderation_timeout: config.moderation_timeout,
            moderation_policy: config.moderation_policy,
        })
    }

    /// Attach an external moderation client.
    #[must_use]
    pub fn with_moderation(mut self, client: Arc<dyn ModerationClient>) -> Self {
        self.moderation = Some(client);
        self
    }

    /// Run the ordered filters over raw message text.
    ///
    /// Message text is never logged, only which filter fired.
    pub async fn validate(&self, text: &str) -> Verdict {
        if let Some(pattern) = self.injection.first_match(text) {
            tracing::warn!(pattern, "injection pattern matched, blocking message");
            return Verdict {
                allowed: false,
                reasons: vec![GateReason::InjectionDetected],
                severity: Severity::Elevated,
            };
        }

        let mut reasons = Vec::new();
        let mut severity = Severity::Routine;
        let mut allowed = true;

        if self.crisis.detect(text) {
            tracing::warn!("crisis language detected, escalating without blocking");
            reasons.push(GateReason::CrisisDetected);
            severity = Severity::Critical;
        }

        if let Some(client) = &self.moderation {
            match tokio::time::timeout(self.moderation_timeout, client.classify(text)).await {
                Ok(Ok(response)) if response.flagged => {
                    tracing::info!(categories = ?response.categories, "moderation flagged message");
                    reasons.push(GateReason::ModerationFlagged);
                    severity = severity.max(Severity::Elevated);
                    allowed = false;
                },
                Ok(Ok(_)) => {},
                Ok(Err(err)) => {
                    self.handle_moderation_outage(&mut reasons, &mut allowed, &err.to_string());
                },
                Err(_elapsed) => {
                    self.handle_moderation_outage(&mut reasons, &mut allowed, "timeout");
                },
            }
        }

        Verdict { allowed, reasons, severity }
    }

    fn handle_moderation_outage(
        &self,
        reasons: &mut Vec<GateReason>,
        allowed: &mut bool,
        cause: &str,
    ) {
        reasons.push(GateReason::ModerationUnavailable);
        match self.moderation_policy {
            ModerationFailurePolicy::FailClosed => {
                tracing::warn!(cause, "moderation unavailable, failing closed");
                *allowed = false;
            },
            ModerationFailurePolicy::FailOpen => {
                tracing::warn!(cause, "moderation unavailable, failing open");
            },
        }
    }
}
