//! Authorization gateway library
//!
//! A resource-server-side authorization gateway: it verifies bearer tokens
//! issued by an external identity provider, derives an effective scope set
//! from heterogeneous claim shapes, enforces per-route minimum-scope
//! policy, and provisions machine-to-machine API clients with scoped
//! grants on behalf of authenticated owners.
//!
//! # Components
//!
//! - **Key resolution**: issuer signing keys, cached with TTL and
//!   single-flight refresh ([`auth::keys`])
//! - **Token verification**: signature, algorithm, issuer, audience and
//!   time-window checks ([`auth::verifier`])
//! - **Scope normalization**: three claim shapes to one canonical set
//!   ([`auth::scopes`])
//! - **Authorization policy**: conjunctive per-route scope requirements
//!   ([`auth::policy`])
//! - **Client provisioning**: machine-to-machine clients with ownership
//!   tracking against the identity provider's management API
//!   ([`provision`])
//! - **Admission controls**: per-IP rate limiting and origin
//!   allow-listing ([`gateway::admission`])
//!
//! The gateway never issues tokens and never sees credentials; the
//! login flow belongs entirely to the identity provider.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod provision;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
