//! Keystore loading.
//!
//! A keystore is a directory of PEM files, one per alias. `<alias>.pem`
//! holds the certificate chain for that alias, leaf certificate first.
//! The server keystore lives at `keystore.location`; tenant keystores live
//! under `keystore.tenant_directory`, one directory per tenant named after
//! the sanitized, lower-cased tenant domain (`Foo.com` -> `foo-com`).
//! Both kinds can be kept in a moka cache for `keystore.cache_ttl_secs`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use thiserror::Error;

use crate::config::KeystoreSettings;
use crate::tenant::{TenantContext, TenantId};

/// A DER encoded X.509 certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate(Vec<u8>);

impl Certificate {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Certificate(der.into())
    }

    pub fn der(&self) -> &[u8] {
        &self.0
    }
}

/// A certificate and its chain as stored under one alias.
#[derive(Clone, Debug)]
pub struct CertificateEntry {
    pub alias: String,
    pub certificate: Certificate,
    /// Leaf first; `chain[0]` is `certificate`.
    pub chain: Vec<Certificate>,
}

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("failed to read keystore at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {path}")]
    NoCertificates { path: PathBuf },
    #[error("alias `{alias}` not present in keystore {store}")]
    AliasNotFound { store: String, alias: String },
    #[error("illegal keystore name `{0}`")]
    InvalidName(String),
    #[error("tenant {0} has no keystore")]
    UnknownTenant(TenantId),
}

/// Read-only view of one keystore.
#[derive(Debug)]
pub struct Keystore {
    name: String,
    entries: BTreeMap<String, CertificateEntry>,
}

impl Keystore {
    /// Reads every `*.pem` file in `dir` as one alias entry.
    #[tracing::instrument]
    pub fn open(dir: &Path) -> Result<Self, KeystoreError> {
        let io_err = |source| KeystoreError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = BTreeMap::new();
        for dirent in std::fs::read_dir(dir).map_err(io_err)? {
            let path = dirent.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pem") {
                continue;
            }
            let Some(alias) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let chain = read_chain(&path)?;
            entries.insert(
                alias.to_string(),
                CertificateEntry {
                    alias: alias.to_string(),
                    certificate: chain[0].clone(),
                    chain,
                },
            );
        }

        if entries.is_empty() {
            return Err(KeystoreError::NoCertificates {
                path: dir.to_path_buf(),
            });
        }

        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        tracing::debug!(keystore = %name, aliases = entries.len(), "keystore loaded");
        Ok(Self { name, entries })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self, alias: &str) -> Result<&CertificateEntry, KeystoreError> {
        self.entries
            .get(alias)
            .ok_or_else(|| KeystoreError::AliasNotFound {
                store: self.name.clone(),
                alias: alias.to_string(),
            })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn read_chain(path: &Path) -> Result<Vec<Certificate>, KeystoreError> {
    let file = File::open(path).map_err(|source| KeystoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let chain = rustls_pemfile::certs(&mut BufReader::new(file))
        .map(|cert| cert.map(|der| Certificate::from_der(der.as_ref())))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| KeystoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if chain.is_empty() {
        return Err(KeystoreError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(chain)
}

/// Keystore file name for a tenant domain: trimmed, dots replaced by dashes.
pub fn tenant_keystore_name(domain: &str) -> String {
    domain.trim().replace('.', "-")
}

/// Access to tenant keystores.
pub trait KeystoreManager: Send + Sync {
    fn tenant_keystore(&self, tenant: TenantId, name: &str)
    -> Result<Arc<Keystore>, KeystoreError>;
}

/// Loads tenant keystores from `<root>/<name>/`.
#[derive(Clone, Debug)]
pub struct FileKeystoreManager {
    root: PathBuf,
}

impl FileKeystoreManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl KeystoreManager for FileKeystoreManager {
    fn tenant_keystore(
        &self,
        _tenant: TenantId,
        name: &str,
    ) -> Result<Arc<Keystore>, KeystoreError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(KeystoreError::InvalidName(name.to_string()));
        }
        Keystore::open(&self.root.join(name)).map(Arc::new)
    }
}

/// Keeps loaded tenant keystores for a fixed time. Failed loads are retried
/// on the next request.
pub struct CachingKeystoreManager<M> {
    inner: M,
    cache: Cache<(TenantId, String), Arc<Keystore>>,
}

impl<M: KeystoreManager> CachingKeystoreManager<M> {
    pub fn new(inner: M, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }
}

impl<M: KeystoreManager> KeystoreManager for CachingKeystoreManager<M> {
    fn tenant_keystore(
        &self,
        tenant: TenantId,
        name: &str,
    ) -> Result<Arc<Keystore>, KeystoreError> {
        let key = (tenant, name.to_string());
        if let Some(keystore) = self.cache.get(&key) {
            return Ok(keystore);
        }
        let keystore = self.inner.tenant_keystore(tenant, name)?;
        self.cache.insert(key, keystore.clone());
        Ok(keystore)
    }
}

/// A keystore together with the alias of the tenant's signing certificate.
pub struct LoadedKeystore {
    pub keystore: Arc<Keystore>,
    pub primary_alias: String,
}

impl LoadedKeystore {
    pub fn primary(&self) -> Result<&CertificateEntry, KeystoreError> {
        self.keystore.entry(&self.primary_alias)
    }
}

/// Picks the keystore for a tenant: the server keystore for the super
/// tenant, the tenant's own keystore otherwise.
pub struct KeystoreProvider {
    server_location: PathBuf,
    server_alias: String,
    server_cache: Option<Cache<PathBuf, Arc<Keystore>>>,
    manager: Arc<dyn KeystoreManager>,
}

impl KeystoreProvider {
    pub fn new(
        server_location: impl Into<PathBuf>,
        server_alias: impl Into<String>,
        manager: Arc<dyn KeystoreManager>,
    ) -> Self {
        Self {
            server_location: server_location.into(),
            server_alias: server_alias.into(),
            server_cache: None,
            manager,
        }
    }

    /// Keeps the server keystore for `ttl` instead of reading it on every
    /// super tenant request.
    pub fn with_server_cache(mut self, ttl: Duration) -> Self {
        self.server_cache = Some(Cache::builder().time_to_live(ttl).build());
        self
    }

    pub fn from_settings(settings: &KeystoreSettings) -> Self {
        let manager = CachingKeystoreManager::new(
            FileKeystoreManager::new(&settings.tenant_directory),
            Duration::from_secs(settings.cache_ttl_secs),
        );
        Self::new(&settings.location, &settings.key_alias, Arc::new(manager))
            .with_server_cache(Duration::from_secs(settings.cache_ttl_secs))
    }

    fn server_keystore(&self) -> Result<Arc<Keystore>, KeystoreError> {
        let Some(cache) = &self.server_cache else {
            return Keystore::open(&self.server_location).map(Arc::new);
        };
        if let Some(keystore) = cache.get(&self.server_location) {
            return Ok(keystore);
        }
        let keystore = Arc::new(Keystore::open(&self.server_location)?);
        cache.insert(self.server_location.clone(), keystore.clone());
        Ok(keystore)
    }

    #[tracing::instrument(skip(self), fields(tenant_id = %tenant.id))]
    pub fn load(&self, tenant: &TenantContext) -> Result<LoadedKeystore, KeystoreError> {
        if tenant.id.is_super() {
            return Ok(LoadedKeystore {
                keystore: self.server_keystore()?,
                primary_alias: self.server_alias.clone(),
            });
        }

        // tenant domains are registered lower-cased
        let domain = match tenant.domain.as_deref().map(str::trim) {
            Some(d) if !tenant.id.is_invalid() && !d.is_empty() => d.to_ascii_lowercase(),
            _ => return Err(KeystoreError::UnknownTenant(tenant.id)),
        };
        let keystore = self
            .manager
            .tenant_keystore(tenant.id, &tenant_keystore_name(&domain))?;
        Ok(LoadedKeystore {
            keystore,
            primary_alias: domain,
        })
    }
}
