//! Tenant-scoped JSON Web Key Set publisher.
//!
//! Publishes the public signing certificates of each tenant as a JWKS so
//! relying parties can verify issued tokens. [`jwks::JwksEngine`] builds the
//! key-sets; [`app`] exposes them over HTTP.

use axum::{Router, routing::get};
use std::sync::Arc;

pub mod algorithm;
pub mod audit;
pub mod config;
pub mod jwks;
pub mod key;
pub mod keystore;
pub mod middleware;
pub mod telemetry;
pub mod tenant;

pub struct AppState {
    pub engine: Arc<jwks::JwksEngine>,
}

/// Key-set routes: `/oauth2/jwks` for the super tenant and
/// `/t/{tenant}/oauth2/jwks` for every other tenant.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/oauth2/jwks", get(jwks::super_tenant_jwks))
        .route("/t/{tenant}/oauth2/jwks", get(jwks::tenant_jwks))
        .layer(middleware::RequestTraceLayer::new())
        .with_state(state)
}
