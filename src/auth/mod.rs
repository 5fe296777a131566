//! Authentication and authorization — the verification pipeline.
//!
//! Every protected request flows key resolution → token verification →
//! scope normalization → policy decision, in that order. The submodules
//! mirror the pipeline stages:
//!
//! - [`keys`]: signing-key cache with lazy, single-flight refresh
//! - [`verifier`]: bearer token verification against the key cache
//! - [`scopes`]: heterogeneous permission claims to one canonical set
//! - [`policy`]: conjunctive minimum-scope decisions
//! - [`middleware`]: axum wiring for the above

pub mod keys;
pub mod middleware;
pub mod policy;
pub mod scopes;
pub mod verifier;

pub use keys::KeyResolver;
pub use middleware::AuthContext;
pub use scopes::ScopeSet;
pub use verifier::TokenVerifier;
