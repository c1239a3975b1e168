//! External moderation service seam.
//!
//! The only network-bound stage in the pipeline. The gate enforces the
//! timeout; implementations just make the call. Outage behavior is the
//! gate's configured fail-open/fail-closed policy, never an implicit
//! default.

use async_trait::async_trait;
use thiserror::Error;

/// Classification returned by the moderation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationResponse {
    /// Whether the service considers the text disallowed
    pub flagged: bool,
    /// Service-specific category tags (recorded in the audit detail)
    pub categories: Vec<String>,
}

/// Errors from the moderation service itself (timeouts are enforced by
/// the gate, not reported here).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModerationError {
    /// The request could not be completed
    #[error("moderation request failed: {0}")]
    Request(String),
}

/// Client for an external moderation API.
#[async_trait]
pub trait ModerationClient: Send + Sync {
    /// Classify raw message text.
    ///
    /// # Errors
    ///
    /// Returns [`ModerationError::Request`] on transport or service
    /// failure; the gate maps this through its failure policy.
    async fn classify(&self, text: &str) -> Result<ModerationResponse, ModerationError>;
}
