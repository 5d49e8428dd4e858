//! Tenant resolution for key-set requests.
//!
//! Maps the tenant domain a request arrives with to a [`TenantId`]. The
//! lookup itself is delegated to a [`TenantDirectory`]; the resolver only
//! decides what an absent, empty or unknown domain means.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

/// Domain name of the default tenant, served from the server keystore.
pub const SUPER_TENANT_DOMAIN: &str = "carbon.super";

/// Numeric identifier of a tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i32);

impl TenantId {
    /// The default/root tenant.
    pub const SUPER: TenantId = TenantId(-1234);
    /// Sentinel for a domain the directory could not resolve.
    pub const INVALID: TenantId = TenantId(-1);

    pub const fn new(id: i32) -> Self {
        TenantId(id)
    }

    pub fn is_super(self) -> bool {
        self == Self::SUPER
    }

    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The tenant a single request is served for.
///
/// `domain` is kept exactly as received so collaborators that depend on it
/// (key-ID providers in particular) can tell "no tenant context" apart from
/// "the default tenant".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantContext {
    pub domain: Option<String>,
    pub id: TenantId,
}

impl TenantContext {
    /// Domain for log and error output.
    pub fn display_domain(&self) -> &str {
        self.domain.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Error)]
pub enum TenantLookupError {
    #[error("tenant domain `{0}` is not registered")]
    NotFound(String),
    #[error("tenant directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of truth for tenant domain to id mappings.
pub trait TenantDirectory: Send + Sync {
    fn tenant_id(&self, domain: &str) -> Result<TenantId, TenantLookupError>;
}

/// One `tenants:` entry in the configuration file.
#[derive(Clone, Debug, Deserialize)]
pub struct TenantRecord {
    pub domain: String,
    pub id: TenantId,
}

/// A [`TenantDirectory`] backed by the statically configured tenant list.
#[derive(Clone, Debug, Default)]
pub struct StaticTenantDirectory {
    tenants: HashMap<String, TenantId>,
}

impl StaticTenantDirectory {
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TenantRecord>,
    {
        let mut tenants: HashMap<String, TenantId> = records
            .into_iter()
            .map(|r| (r.domain.trim().to_ascii_lowercase(), r.id))
            .collect();
        tenants.insert(SUPER_TENANT_DOMAIN.to_string(), TenantId::SUPER);
        Self { tenants }
    }
}

impl TenantDirectory for StaticTenantDirectory {
    fn tenant_id(&self, domain: &str) -> Result<TenantId, TenantLookupError> {
        self.tenants
            .get(&domain.trim().to_ascii_lowercase())
            .copied()
            .ok_or_else(|| TenantLookupError::NotFound(domain.to_string()))
    }
}

/// Resolves request domains into [`TenantContext`]s.
#[derive(Clone)]
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>) -> Self {
        Self { directory }
    }

    /// Never fails: unknown domains resolve to [`TenantId::INVALID`].
    #[tracing::instrument(skip(self))]
    pub fn resolve(&self, domain: Option<&str>) -> TenantContext {
        let id = match domain.map(str::trim) {
            None | Some("") => TenantId::SUPER,
            Some(d) if d.eq_ignore_ascii_case(SUPER_TENANT_DOMAIN) => TenantId::SUPER,
            Some(d) => match self.directory.tenant_id(d) {
                Ok(id) => id,
                Err(err) => {
                    tracing::debug!(error = %err, "tenant lookup failed");
                    TenantId::INVALID
                }
            },
        };

        TenantContext {
            domain: domain.map(str::to_string),
            id,
        }
    }
}

/// Brackets tenant-specific work, e.g. to load tenant registries.
pub trait TenantFlow: Send + Sync {
    fn start(&self, domain: &str);
    fn end(&self, domain: &str);
}

/// Default [`TenantFlow`] that only records the bracket in the trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTenantFlow;

impl TenantFlow for TracingTenantFlow {
    fn start(&self, domain: &str) {
        tracing::debug!(tenant = domain, "tenant flow started");
    }

    fn end(&self, domain: &str) {
        tracing::debug!(tenant = domain, "tenant flow ended");
    }
}

/// Ends the tenant flow it was started for when dropped.
pub struct TenantFlowGuard<'a> {
    flow: &'a dyn TenantFlow,
    domain: String,
}

impl<'a> TenantFlowGuard<'a> {
    pub fn start(flow: &'a dyn TenantFlow, domain: &str) -> Self {
        flow.start(domain);
        Self {
            flow,
            domain: domain.to_string(),
        }
    }
}

impl Drop for TenantFlowGuard<'_> {
    fn drop(&mut self) {
        self.flow.end(&self.domain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct UnavailableDirectory;

    impl TenantDirectory for UnavailableDirectory {
        fn tenant_id(&self, _domain: &str) -> Result<TenantId, TenantLookupError> {
            Err(TenantLookupError::Unavailable("connection refused".to_string()))
        }
    }

    fn resolver() -> TenantResolver {
        TenantResolver::new(Arc::new(StaticTenantDirectory::new(vec![TenantRecord {
            domain: "foo.com".to_string(),
            id: TenantId::new(1),
        }])))
    }

    #[test]
    fn test_absent_and_empty_domains_resolve_to_super_tenant() {
        let resolver = resolver();

        let absent = resolver.resolve(None);
        assert_eq!(absent.id, TenantId::SUPER);
        assert_eq!(absent.domain, None);

        let empty = resolver.resolve(Some(""));
        assert_eq!(empty.id, TenantId::SUPER);
        assert_eq!(empty.domain.as_deref(), Some(""));

        assert_eq!(resolver.resolve(Some("  ")).id, TenantId::SUPER);
        assert_eq!(resolver.resolve(Some("Carbon.Super")).id, TenantId::SUPER);
    }

    #[test]
    fn test_registered_domain_resolves_to_its_id() {
        let ctx = resolver().resolve(Some("FOO.com"));
        assert_eq!(ctx.id, TenantId::new(1));
        assert_eq!(ctx.domain.as_deref(), Some("FOO.com"));
    }

    #[test]
    fn test_unknown_domain_resolves_to_invalid_sentinel() {
        let ctx = resolver().resolve(Some("invalid.com"));
        assert!(ctx.id.is_invalid());
        assert!(!ctx.id.is_super());
    }

    #[test]
    fn test_directory_failure_resolves_to_invalid_sentinel() {
        let resolver = TenantResolver::new(Arc::new(UnavailableDirectory));
        assert_eq!(resolver.resolve(Some("foo.com")).id, TenantId::INVALID);
        // the default tenant never hits the directory
        assert_eq!(resolver.resolve(None).id, TenantId::SUPER);
    }

    #[test]
    fn test_display_domain() {
        let ctx = TenantContext {
            domain: None,
            id: TenantId::SUPER,
        };
        assert_eq!(ctx.display_domain(), "unknown");
    }

    #[derive(Default)]
    struct RecordingFlow {
        events: Mutex<Vec<String>>,
    }

    impl TenantFlow for RecordingFlow {
        fn start(&self, domain: &str) {
            self.events.lock().unwrap().push(format!("start:{domain}"));
        }

        fn end(&self, domain: &str) {
            self.events.lock().unwrap().push(format!("end:{domain}"));
        }
    }

    #[test]
    fn test_flow_guard_ends_flow_on_drop() {
        let flow = RecordingFlow::default();
        {
            let _guard = TenantFlowGuard::start(&flow, "foo.com");
            assert_eq!(*flow.events.lock().unwrap(), vec!["start:foo.com"]);
        }
        assert_eq!(
            *flow.events.lock().unwrap(),
            vec!["start:foo.com", "end:foo.com"]
        );
    }
}
