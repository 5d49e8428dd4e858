//! Configuration management for the key-set service.
//!
//! Settings are read from `config.yaml` (or the file named by
//! `TENANT_JWKS_CONFIG`) and may be overridden with `TENANT_JWKS_*`
//! environment variables, using `__` to separate nested keys.

use std::collections::BTreeMap;
use std::path::PathBuf;

use jsonwebtoken::Algorithm;
use serde::Deserialize;

use crate::tenant::TenantRecord;

/// Application configuration settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Port number the server will listen on.
    pub port: u16,
    pub keystore: KeystoreSettings,
    #[serde(default)]
    pub signature_algorithms: SignatureAlgorithmSettings,
    /// Tenants known to the static tenant directory. The super tenant is
    /// always known and need not be listed.
    #[serde(default)]
    pub tenants: Vec<TenantRecord>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Where signing certificates are read from.
#[derive(Clone, Debug, Deserialize)]
pub struct KeystoreSettings {
    /// Directory of the server keystore used for the super tenant.
    pub location: PathBuf,
    /// Alias of the server signing certificate.
    pub key_alias: String,
    /// Root directory holding one keystore directory per tenant.
    pub tenant_directory: PathBuf,
    /// How long a loaded tenant keystore is reused.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// Signature algorithms used for each kind of issued token.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SignatureAlgorithmSettings {
    pub id_token: String,
    pub access_token: String,
    pub user_info: String,
    /// Extra or overriding `name -> JWS algorithm` entries, e.g.
    /// `SHA512withRSA: RS256`.
    pub mappings: BTreeMap<String, Algorithm>,
}

impl Default for SignatureAlgorithmSettings {
    fn default() -> Self {
        Self {
            id_token: "SHA256withRSA".to_string(),
            access_token: "SHA256withRSA".to_string(),
            user_info: "SHA256withRSA".to_string(),
            mappings: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LoggingFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub format: LoggingFormat,
    pub level: LogLevel,
    /// Level for axum/tower internals.
    pub axum_level: LogLevel,
    /// Export spans over OTLP (endpoint taken from the standard
    /// `OTEL_EXPORTER_OTLP_*` variables).
    pub otlp_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: env!("CARGO_PKG_NAME").to_string(),
            format: LoggingFormat::Pretty,
            level: LogLevel::Info,
            axum_level: LogLevel::Warn,
            otlp_enabled: false,
        }
    }
}

/// Loads configuration from the config file and the environment.
#[tracing::instrument]
pub fn load_config() -> Result<Settings, config::ConfigError> {
    let path = std::env::var("TENANT_JWKS_CONFIG").unwrap_or_else(|_| "config".to_string());

    config::Config::builder()
        .add_source(config::File::with_name(&path))
        .add_source(
            config::Environment::with_prefix("TENANT_JWKS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .and_then(|cfg| cfg.try_deserialize::<Settings>())
        .inspect_err(|e| tracing::error!("Failed to load configuration: {}", e))
}
