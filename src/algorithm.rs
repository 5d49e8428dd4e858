//! Signature algorithm registry.
//!
//! Tokens of each kind are signed with a configured signature algorithm such
//! as `SHA256withRSA`. The key-set advertises keys by their JWS name
//! (`RS256`), so every configured name is translated once, at startup.

use std::collections::BTreeMap;

use jsonwebtoken::Algorithm;

use crate::config::SignatureAlgorithmSettings;

/// Kinds of token whose signing keys are published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningPurpose {
    IdToken,
    AccessToken,
    UserInfo,
}

impl SigningPurpose {
    /// Resolution order of the key-set. The default (access-token) key
    /// comes first.
    pub const ALL: [SigningPurpose; 3] = [
        SigningPurpose::AccessToken,
        SigningPurpose::IdToken,
        SigningPurpose::UserInfo,
    ];
}

/// Built-in signature algorithm name to JWS algorithm table.
fn default_mappings() -> BTreeMap<String, Algorithm> {
    [
        ("SHA256withRSA", Algorithm::RS256),
        ("SHA384withRSA", Algorithm::RS384),
        ("SHA512withRSA", Algorithm::RS512),
        ("SHA256withPS", Algorithm::PS256),
        ("SHA384withPS", Algorithm::PS384),
        ("SHA512withPS", Algorithm::PS512),
        ("SHA256withECDSA", Algorithm::ES256),
        ("SHA384withECDSA", Algorithm::ES384),
    ]
    .into_iter()
    .map(|(name, alg)| (name.to_ascii_lowercase(), alg))
    .collect()
}

/// JWS `alg` header value.
pub fn jws_name(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::EdDSA => "EdDSA",
    }
}

/// Published keys are always `kty = "RSA"`.
fn is_rsa(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

/// The three configured signature algorithms and their JWS mapping.
///
/// Immutable after construction.
#[derive(Clone, Debug)]
pub struct SignatureAlgorithmRegistry {
    id_token: String,
    access_token: String,
    user_info: String,
    mappings: BTreeMap<String, Algorithm>,
}

impl SignatureAlgorithmRegistry {
    pub fn new(settings: &SignatureAlgorithmSettings) -> Self {
        let mut mappings = default_mappings();
        mappings.extend(
            settings
                .mappings
                .iter()
                .map(|(name, alg)| (name.to_ascii_lowercase(), *alg)),
        );

        Self {
            id_token: settings.id_token.clone(),
            access_token: settings.access_token.clone(),
            user_info: settings.user_info.clone(),
            mappings,
        }
    }

    /// Maps a signature algorithm name to its JWS algorithm. Names are
    /// matched case-insensitively.
    pub fn map(&self, name: &str) -> Option<Algorithm> {
        self.mappings.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn configured_name(&self, purpose: SigningPurpose) -> &str {
        match purpose {
            SigningPurpose::IdToken => &self.id_token,
            SigningPurpose::AccessToken => &self.access_token,
            SigningPurpose::UserInfo => &self.user_info,
        }
    }

    /// `None` when the configured name is unmapped or not an RSA algorithm;
    /// such purposes are left out of the key-set.
    pub fn algorithm_for(&self, purpose: SigningPurpose) -> Option<(&str, Algorithm)> {
        let name = self.configured_name(purpose);
        match self.map(name) {
            Some(alg) if is_rsa(alg) => Some((name, alg)),
            Some(alg) => {
                tracing::warn!(
                    ?purpose,
                    algorithm = name,
                    jws = jws_name(alg),
                    "signature algorithm is not RSA, skipping key"
                );
                None
            }
            None => {
                tracing::warn!(?purpose, algorithm = name, "unmapped signature algorithm, skipping key");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(id: &str, access: &str, user_info: &str) -> SignatureAlgorithmSettings {
        SignatureAlgorithmSettings {
            id_token: id.to_string(),
            access_token: access.to_string(),
            user_info: user_info.to_string(),
            mappings: BTreeMap::new(),
        }
    }

    #[test]
    fn test_default_mappings() {
        let registry = SignatureAlgorithmRegistry::new(&SignatureAlgorithmSettings::default());
        assert_eq!(registry.map("SHA256withRSA"), Some(Algorithm::RS256));
        assert_eq!(registry.map("SHA384withRSA"), Some(Algorithm::RS384));
        assert_eq!(registry.map("SHA512withRSA"), Some(Algorithm::RS512));
        assert_eq!(registry.map("SHA256withPS"), Some(Algorithm::PS256));
        assert_eq!(registry.map("sha256withrsa"), Some(Algorithm::RS256));
        assert_eq!(registry.map("MD5withRSA"), None);
    }

    #[test]
    fn test_algorithm_for_each_purpose() {
        let registry = SignatureAlgorithmRegistry::new(&settings(
            "SHA512withRSA",
            "SHA256withRSA",
            "SHA384withRSA",
        ));

        assert_eq!(
            registry.algorithm_for(SigningPurpose::IdToken),
            Some(("SHA512withRSA", Algorithm::RS512))
        );
        assert_eq!(
            registry.algorithm_for(SigningPurpose::AccessToken),
            Some(("SHA256withRSA", Algorithm::RS256))
        );
        assert_eq!(
            registry.algorithm_for(SigningPurpose::UserInfo),
            Some(("SHA384withRSA", Algorithm::RS384))
        );
    }

    #[test]
    fn test_unmapped_and_non_rsa_purposes_are_skipped() {
        let registry = SignatureAlgorithmRegistry::new(&settings(
            "SHA256withECDSA",
            "SHA256withRSA",
            "NONE",
        ));

        assert_eq!(registry.algorithm_for(SigningPurpose::IdToken), None);
        assert!(registry.algorithm_for(SigningPurpose::AccessToken).is_some());
        assert_eq!(registry.algorithm_for(SigningPurpose::UserInfo), None);
    }

    #[test]
    fn test_configured_mappings_override_defaults() {
        let mut s = settings("SHA512withRSA", "SHA256withRSA", "Custom");
        s.mappings.insert("SHA512withRSA".to_string(), Algorithm::RS256);
        s.mappings.insert("Custom".to_string(), Algorithm::PS512);
        let registry = SignatureAlgorithmRegistry::new(&s);

        assert_eq!(registry.map("SHA512withRSA"), Some(Algorithm::RS256));
        assert_eq!(
            registry.algorithm_for(SigningPurpose::UserInfo),
            Some(("Custom", Algorithm::PS512))
        );
    }

    #[test]
    fn test_purpose_order_starts_with_access_token() {
        assert_eq!(SigningPurpose::ALL[0], SigningPurpose::AccessToken);
        assert_eq!(SigningPurpose::ALL.len(), 3);
    }

    #[test]
    fn test_jws_name() {
        assert_eq!(jws_name(Algorithm::RS256), "RS256");
        assert_eq!(jws_name(Algorithm::PS384), "PS384");
        assert_eq!(jws_name(Algorithm::EdDSA), "EdDSA");
    }
}
