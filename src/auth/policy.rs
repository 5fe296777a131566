//! Authorization policy — minimum-scope checks per protected operation.
//!
//! Policy is conjunctive: every required scope must be present in the
//! caller's granted set. There are no OR-semantics. The static per-route
//! requirement table lives in the router (`gateway::router`), which attaches
//! a requirement to each protected route; this module owns the decision
//! itself.

use super::scopes::ScopeSet;

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// All required scopes are present.
    Allow,
    /// At least one required scope is absent. Carries the sorted missing
    /// scopes for the error body and the audit log.
    Deny {
        /// Required scopes the caller does not hold.
        missing: Vec<String>,
    },
}

impl Decision {
    /// Whether the decision is [`Decision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decide whether `granted` satisfies `required`.
///
/// An empty requirement always allows. Note that the authentication
/// middleware has already run by the time any policy check happens, so
/// "no scope requirement" still means "valid token required".
#[must_use]
pub fn authorize(granted: &ScopeSet, required: &ScopeSet) -> Decision {
    let missing = granted.missing_from(required);
    if missing.is_empty() {
        Decision::Allow
    } else {
        Decision::Deny { missing }
    }
}
