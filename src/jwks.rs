//! Logic for the JWKS endpoints.
//!
//! Builds the JSON Web Key Set (JWKS) containing the public certificates a
//! tenant signs its tokens with, and serves it over HTTP.
//!
//! Invalid tenants and tenants whose keystore cannot be loaded get an empty
//! key-set, which does not reveal whether the tenant exists. Failing to
//! derive a key id aborts generation and produces a plain-text error body,
//! still with a 200 status.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::algorithm::{SignatureAlgorithmRegistry, SigningPurpose};
use crate::audit;
use crate::config::Settings;
use crate::key::{KeyDescriptorBuilder, KeyIdError, KeyIdProvider};
use crate::keystore::KeystoreProvider;
use crate::tenant::{
    SUPER_TENANT_DOMAIN, StaticTenantDirectory, TenantContext, TenantDirectory, TenantFlow,
    TenantFlowGuard, TenantResolver, TracingTenantFlow,
};

/// A JSON Web Key Set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Jwks {
    /// List of keys.
    pub keys: Vec<Jwk>,
}

/// A JSON Web Key describing one signing certificate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID.
    pub kid: String,
    /// Key type, always "RSA".
    pub kty: String,
    /// Key use, always "sig".
    pub r#use: String,
    /// Algorithm (e.g., "RS256").
    pub alg: String,
    /// SHA-256 certificate thumbprint (Base64URL encoded).
    #[serde(rename = "x5t#S256")]
    pub x5t_s256: String,
    /// Certificate chain, leaf first (Base64 DER).
    pub x5c: Vec<String>,
}

/// Result of a key-set generation.
#[derive(Debug, PartialEq)]
pub enum KeySetDocument {
    KeySet(Jwks),
    /// Generation was aborted; rendered as a plain-text message.
    Failed { tenant_domain: String },
}

impl KeySetDocument {
    pub fn error_message(tenant_domain: &str) -> String {
        format!("Error while generating the keyset for {tenant_domain} tenant domain.")
    }

    /// Response body as served to clients.
    pub fn body(&self) -> Result<String, serde_json::Error> {
        match self {
            KeySetDocument::KeySet(jwks) => serde_json::to_string(jwks),
            KeySetDocument::Failed { tenant_domain } => Ok(Self::error_message(tenant_domain)),
        }
    }
}

impl IntoResponse for KeySetDocument {
    fn into_response(self) -> Response {
        match self {
            KeySetDocument::KeySet(jwks) => Json(jwks).into_response(),
            KeySetDocument::Failed { tenant_domain } => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                Self::error_message(&tenant_domain),
            )
                .into_response(),
        }
    }
}

/// Generates tenant key-sets.
///
/// Holds only read-only collaborators; every call to [`JwksEngine::generate`]
/// works on its own tenant context and keystore handle.
pub struct JwksEngine {
    tenants: TenantResolver,
    tenant_flow: Arc<dyn TenantFlow>,
    keystores: KeystoreProvider,
    algorithms: SignatureAlgorithmRegistry,
    descriptors: KeyDescriptorBuilder,
}

impl JwksEngine {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        keystores: KeystoreProvider,
        algorithms: SignatureAlgorithmRegistry,
    ) -> Self {
        Self {
            tenants: TenantResolver::new(directory),
            tenant_flow: Arc::new(TracingTenantFlow),
            keystores,
            algorithms,
            descriptors: KeyDescriptorBuilder::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Arc::new(StaticTenantDirectory::new(settings.tenants.clone())),
            KeystoreProvider::from_settings(&settings.keystore),
            SignatureAlgorithmRegistry::new(&settings.signature_algorithms),
        )
    }

    pub fn with_key_id_provider(mut self, provider: Arc<dyn KeyIdProvider>) -> Self {
        self.descriptors = KeyDescriptorBuilder::new(provider);
        self
    }

    pub fn with_tenant_flow(mut self, flow: Arc<dyn TenantFlow>) -> Self {
        self.tenant_flow = flow;
        self
    }

    /// Builds the key-set for `tenant_domain`. Never fails; see the module
    /// docs for how failures are reported.
    #[tracing::instrument(skip(self))]
    pub fn generate(&self, tenant_domain: Option<&str>) -> KeySetDocument {
        let tenant = self.tenants.resolve(tenant_domain);
        if tenant.id.is_invalid() {
            tracing::debug!("unresolved tenant, serving empty key-set");
            return KeySetDocument::KeySet(Jwks::default());
        }

        let _flow = match tenant.domain.as_deref() {
            Some(domain) if !tenant.id.is_super() => {
                Some(TenantFlowGuard::start(self.tenant_flow.as_ref(), domain))
            }
            _ => None,
        };

        match self.build_keys(&tenant) {
            Ok(jwks) => KeySetDocument::KeySet(jwks),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    tenant = tenant.display_domain(),
                    "failed to generate key-set"
                );
                KeySetDocument::Failed {
                    tenant_domain: tenant.display_domain().to_string(),
                }
            }
        }
    }

    fn build_keys(&self, tenant: &TenantContext) -> Result<Jwks, KeyIdError> {
        let loaded = match self.keystores.load(tenant) {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::warn!(error = %err, tenant_id = %tenant.id, "keystore unavailable, serving empty key-set");
                return Ok(Jwks::default());
            }
        };
        let primary = match loaded.primary() {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, tenant_id = %tenant.id, "signing certificate missing, serving empty key-set");
                return Ok(Jwks::default());
            }
        };

        let mut seen = HashSet::new();
        let mut jwks = Jwks::default();
        for purpose in SigningPurpose::ALL {
            let Some((_, algorithm)) = self.algorithms.algorithm_for(purpose) else {
                continue;
            };
            let jwk = self.descriptors.build(primary, tenant, algorithm)?;
            if seen.insert((jwk.kid.clone(), jwk.alg.clone())) {
                jwks.keys.push(jwk);
            }
        }

        tracing::debug!(keys = jwks.keys.len(), tenant_id = %tenant.id, "key-set built");
        Ok(jwks)
    }
}

/// Handler for `GET /oauth2/jwks`, the super tenant key-set.
pub async fn super_tenant_jwks(State(state): State<Arc<AppState>>) -> Response {
    serve(state, SUPER_TENANT_DOMAIN.to_string()).await
}

/// Handler for `GET /t/{tenant}/oauth2/jwks`.
pub async fn tenant_jwks(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Response {
    serve(state, tenant).await
}

async fn serve(state: Arc<AppState>, tenant_domain: String) -> Response {
    let engine = state.engine.clone();
    let domain = tenant_domain.clone();
    // keystore and tenant lookups block
    let document =
        match tokio::task::spawn_blocking(move || engine.generate(Some(&domain))).await {
            Ok(document) => document,
            Err(err) => {
                tracing::error!(error = %err, "key-set generation task failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    if let KeySetDocument::KeySet(jwks) = &document {
        audit!(keys = jwks.keys.len(), "published key-set for {}", tenant_domain);
    }
    document.into_response()
}
