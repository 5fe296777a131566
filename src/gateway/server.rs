//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::admission::{OriginGuard, RequestLimiter};
use super::router::{AppState, create_router};
use crate::auth::{KeyResolver, TokenVerifier};
use crate::config::Config;
use crate::provision::{HttpManagementApi, ProvisioningService};
use crate::{Error, Result};

/// The authorization gateway server
pub struct Gateway {
    config: Config,
}

impl Gateway {
    /// Create a new gateway from validated configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the gateway until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let keys = KeyResolver::new(self.config.auth.jwks_endpoint(), self.config.auth.jwks_ttl);
        let verifier = Arc::new(TokenVerifier::new(
            keys,
            self.config.auth.issuer.clone(),
            self.config.auth.audience.clone(),
            &self.config.auth.algorithms,
            self.config.auth.leeway,
        ));

        let management = Arc::new(HttpManagementApi::new(&self.config.management));
        let provisioning = Arc::new(ProvisioningService::new(
            management,
            self.config.auth.audience.clone(),
            self.config.management.default_scopes.clone(),
        ));

        let rate_limit = &self.config.admission.rate_limit;
        let state = Arc::new(AppState {
            verifier,
            provisioning,
            api_limiter: Arc::new(RequestLimiter::new(rate_limit.enabled, &rate_limit.api)),
            provisioning_limiter: Arc::new(RequestLimiter::new(
                rate_limit.enabled,
                &rate_limit.provisioning,
            )),
            origin_guard: Arc::new(OriginGuard::new(
                self.config.admission.allowed_origins.clone(),
            )),
            allowed_origins: self.config.admission.allowed_origins.clone(),
        });

        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("AUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(issuer = %self.config.auth.issuer, audience = %self.config.auth.audience, "Token verification");
        info!(management = %self.config.management.base_url, "Client provisioning upstream");

        if self.config.admission.rate_limit.enabled {
            info!(
                api = self.config.admission.rate_limit.api.max_requests,
                provisioning = self.config.admission.rate_limit.provisioning.max_requests,
                "Rate limiting enabled (requests per window)"
            );
        } else {
            warn!("Rate limiting disabled");
        }

        if self.config.admission.allowed_origins.is_empty() {
            warn!("No allowed origins configured - origin guard disabled");
        } else {
            info!(origins = ?self.config.admission.allowed_origins, "Origin allow-list");
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway shutdown complete");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
