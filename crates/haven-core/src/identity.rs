//! Identity and tier model.
//!
//! Identities are issued by the external auth collaborator and treated
//! as read-only input here. The id is the stable account (or
//! device-bound guest) principal, not a session token — quotas and
//! audit attribution must survive sign-out.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable opaque identifier bound to an account or persistent guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId(pub String);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Subscription tier, determines daily message capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Anonymous account persisting across sign-out on the same device
    Guest,
    /// Registered free account
    Free,
    /// Paid subscription
    Premium,
}

/// The principal attached to every request.
///
/// Immutable for the lifetime of the account; this crate never mutates
/// or issues identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable opaque id from the auth collaborator
    pub id: IdentityId,
    /// Subscription tier
    pub tier: Tier,
}

impl Identity {
    /// Convenience constructor for an identity reference.
    pub fn new(id: impl Into<String>, tier: Tier) -> Self {
        Self { id: IdentityId(id.into()), tier }
    }
}
