//! Key descriptors.
//!
//! Turns a keystore certificate entry into the public JWK published for one
//! signing algorithm: key id, SHA-256 thumbprint and the base64 DER chain.

use std::sync::Arc;

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use jsonwebtoken::Algorithm;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::algorithm::jws_name;
use crate::jwks::Jwk;
use crate::keystore::{Certificate, CertificateEntry};
use crate::tenant::TenantContext;

#[derive(Debug, Error)]
pub enum KeyIdError {
    #[error("no tenant context available to derive a key id")]
    MissingTenantContext,
    #[error("certificate has no DER content")]
    EmptyCertificate,
    #[error("key id provider failed: {0}")]
    Provider(String),
}

/// `x5t#S256`: base64url (no padding) SHA-256 digest of the DER certificate.
pub fn thumbprint(certificate: &Certificate) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(certificate.der()))
}

/// Derives the `kid` of a published key.
///
/// Implementations must be deterministic: the same certificate, algorithm
/// and tenant domain always yield the same id.
pub trait KeyIdProvider: Send + Sync {
    fn key_id(
        &self,
        certificate: &Certificate,
        algorithm: Algorithm,
        tenant_domain: Option<&str>,
    ) -> Result<String, KeyIdError>;
}

/// Uses the certificate thumbprint as key id.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThumbprintKeyIdProvider;

impl KeyIdProvider for ThumbprintKeyIdProvider {
    fn key_id(
        &self,
        certificate: &Certificate,
        _algorithm: Algorithm,
        tenant_domain: Option<&str>,
    ) -> Result<String, KeyIdError> {
        if tenant_domain.is_none() {
            return Err(KeyIdError::MissingTenantContext);
        }
        if certificate.der().is_empty() {
            return Err(KeyIdError::EmptyCertificate);
        }
        Ok(thumbprint(certificate))
    }
}

/// Builds [`Jwk`]s with an injected [`KeyIdProvider`].
#[derive(Clone)]
pub struct KeyDescriptorBuilder {
    key_ids: Arc<dyn KeyIdProvider>,
}

impl Default for KeyDescriptorBuilder {
    fn default() -> Self {
        Self::new(Arc::new(ThumbprintKeyIdProvider))
    }
}

impl KeyDescriptorBuilder {
    pub fn new(key_ids: Arc<dyn KeyIdProvider>) -> Self {
        Self { key_ids }
    }

    /// Key id failures are returned unchanged; the caller treats them as fatal.
    #[tracing::instrument(skip(self, entry), fields(alias = %entry.alias, tenant_id = %tenant.id))]
    pub fn build(
        &self,
        entry: &CertificateEntry,
        tenant: &TenantContext,
        algorithm: Algorithm,
    ) -> Result<Jwk, KeyIdError> {
        let kid = self
            .key_ids
            .key_id(&entry.certificate, algorithm, tenant.domain.as_deref())?;

        Ok(Jwk {
            kid,
            kty: "RSA".to_string(),
            r#use: "sig".to_string(),
            alg: jws_name(algorithm).to_string(),
            x5t_s256: thumbprint(&entry.certificate),
            x5c: entry
                .chain
                .iter()
                .map(|cert| STANDARD.encode(cert.der()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::Keystore;
    use crate::tenant::TenantId;
    use std::path::Path;

    const SERVER_CERT_THUMBPRINT: &str = "UPDtpYmK86EVwsUIGUlW5-EU_iNHQ-nSL3Ca58uAG70";
    const TENANT_CERT_THUMBPRINT: &str = "vgeji34kzLU_6u8pLs985j8kPBRFtAYnZi_-yQdktYU";

    fn entry(dir: &str, alias: &str) -> CertificateEntry {
        Keystore::open(Path::new(dir))
            .unwrap()
            .entry(alias)
            .unwrap()
            .clone()
    }

    fn tenant(domain: Option<&str>) -> TenantContext {
        TenantContext {
            domain: domain.map(str::to_string),
            id: TenantId::SUPER,
        }
    }

    #[test]
    fn test_thumbprint_is_sha256_base64url() {
        let server = entry("test/keystores/wso2carbon", "wso2carbon");
        let foo = entry("test/keystores/tenants/foo-com", "foo.com");

        assert_eq!(thumbprint(&server.certificate), SERVER_CERT_THUMBPRINT);
        assert_eq!(thumbprint(&foo.certificate), TENANT_CERT_THUMBPRINT);
        // deterministic
        assert_eq!(thumbprint(&server.certificate), thumbprint(&server.certificate));
        assert!(!SERVER_CERT_THUMBPRINT.contains(['=', '+', '/']));
    }

    #[test]
    fn test_build_populates_every_field() {
        let server = entry("test/keystores/wso2carbon", "wso2carbon");
        let jwk = KeyDescriptorBuilder::default()
            .build(&server, &tenant(Some("")), Algorithm::RS384)
            .unwrap();

        assert_eq!(jwk.kid, SERVER_CERT_THUMBPRINT);
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.r#use, "sig");
        assert_eq!(jwk.alg, "RS384");
        assert_eq!(jwk.x5t_s256, SERVER_CERT_THUMBPRINT);
        assert_eq!(jwk.x5c.len(), 1);
        assert!(jwk.x5c[0].starts_with("MIIDSTCCAjGgAwIBAgIEAoLQ/TANBgkqhkiG9w0B"));
        assert!(jwk.x5c[0].ends_with("6wVsUz1iE61suO5yWi8="));
    }

    #[test]
    fn test_build_encodes_chain_leaf_first() {
        let leaf = entry("test/keystores/tenants/foo-com", "foo.com");
        let issuer = entry("test/keystores/wso2carbon", "wso2carbon");
        let chained = CertificateEntry {
            alias: "foo.com".to_string(),
            certificate: leaf.certificate.clone(),
            chain: vec![leaf.certificate.clone(), issuer.certificate.clone()],
        };

        let jwk = KeyDescriptorBuilder::default()
            .build(&chained, &tenant(Some("foo.com")), Algorithm::RS256)
            .unwrap();

        assert_eq!(jwk.x5c.len(), 2);
        assert_eq!(jwk.x5c[0], STANDARD.encode(leaf.certificate.der()));
        assert_eq!(jwk.x5c[1], STANDARD.encode(issuer.certificate.der()));
        assert_eq!(jwk.x5t_s256, TENANT_CERT_THUMBPRINT);
    }

    #[test]
    fn test_default_provider_requires_tenant_context() {
        let server = entry("test/keystores/wso2carbon", "wso2carbon");
        let err = KeyDescriptorBuilder::default()
            .build(&server, &tenant(None), Algorithm::RS256)
            .unwrap_err();
        assert!(matches!(err, KeyIdError::MissingTenantContext));
    }

    #[test]
    fn test_default_provider_rejects_empty_certificate() {
        let err = ThumbprintKeyIdProvider
            .key_id(&Certificate::from_der(Vec::new()), Algorithm::RS256, Some("foo.com"))
            .unwrap_err();
        assert!(matches!(err, KeyIdError::EmptyCertificate));
    }

    struct AlgorithmSuffixedKeyIds;

    impl KeyIdProvider for AlgorithmSuffixedKeyIds {
        fn key_id(
            &self,
            certificate: &Certificate,
            algorithm: Algorithm,
            _tenant_domain: Option<&str>,
        ) -> Result<String, KeyIdError> {
            Ok(format!("{}_{}", thumbprint(certificate), jws_name(algorithm)))
        }
    }

    #[test]
    fn test_custom_provider_is_used() {
        let server = entry("test/keystores/wso2carbon", "wso2carbon");
        let builder = KeyDescriptorBuilder::new(Arc::new(AlgorithmSuffixedKeyIds));
        let jwk = builder
            .build(&server, &tenant(None), Algorithm::PS256)
            .unwrap();
        assert_eq!(jwk.kid, format!("{SERVER_CERT_THUMBPRINT}_PS256"));
    }
}
