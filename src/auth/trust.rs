//! Issuer trust policy
//!
//! Decides, before any network call, whether a claimed issuer is one the
//! service accepts, and which tenant it is bound to. Issuers come from an
//! explicit list and from an optional realm rule (`{base_url}/{realm}` →
//! tenant).

use crate::config::TrustConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// How an issuer relates to tenants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantBinding {
    /// Platform (core) issuer. A tenant claim, when present, must be one
    /// of `allowed_tenants`.
    Core { allowed_tenants: Vec<String> },
    /// Issuer dedicated to a single tenant
    Tenant(String),
}

/// An issuer the service is configured to accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedIssuer {
    /// Canonical issuer URL; the cache key and the expected `iss`
    pub issuer: String,
    pub binding: TenantBinding,
}

impl TrustedIssuer {
    pub fn tenant(issuer: &str, tenant: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            binding: TenantBinding::Tenant(tenant.to_string()),
        }
    }

    pub fn core(issuer: &str, allowed_tenants: Vec<String>) -> Self {
        Self {
            issuer: issuer.to_string(),
            binding: TenantBinding::Core { allowed_tenants },
        }
    }

    pub fn is_core(&self) -> bool {
        matches!(self.binding, TenantBinding::Core { .. })
    }

    /// Tenant this issuer is dedicated to, if any
    pub fn bound_tenant(&self) -> Option<&str> {
        match &self.binding {
            TenantBinding::Tenant(tenant) => Some(tenant),
            TenantBinding::Core { .. } => None,
        }
    }

    /// Whether a token from this issuer may act for `tenant`
    pub fn accepts_tenant(&self, tenant: &str) -> bool {
        match &self.binding {
            TenantBinding::Tenant(bound) => bound == tenant,
            TenantBinding::Core { allowed_tenants } => allowed_tenants.iter().any(|t| t == tenant),
        }
    }
}

/// Realm-per-tenant issuer rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmRule {
    base_url: String,
    tenants: HashMap<String, String>,
}

impl RealmRule {
    /// `base_url` is the issuer prefix; `tenants` maps realm name to tenant
    pub fn new(base_url: &str, tenants: HashMap<String, String>) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            tenants,
        }
    }

    fn resolve(&self, claimed: &str) -> Option<TrustedIssuer> {
        let claimed = normalize(claimed);
        let prefix = format!("{}/", normalize(&self.base_url));
        let realm = claimed.strip_prefix(&prefix)?;
        if realm.is_empty() || realm.contains('/') {
            return None;
        }

        let (realm, tenant) = self.tenants.get_key_value(realm)?;
        Some(TrustedIssuer::tenant(
            &format!("{}/{}", self.base_url, realm),
            tenant,
        ))
    }
}

/// The set of issuers the service accepts
#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    issuers: HashMap<String, Arc<TrustedIssuer>>,
    realms: Option<RealmRule>,
}

impl TrustPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the policy from configuration
    pub fn from_config(config: &TrustConfig) -> Self {
        let mut policy = Self::new();

        for issuer in &config.issuers {
            let trusted = if issuer.core {
                TrustedIssuer::core(&issuer.issuer, issuer.allowed_tenants.clone())
            } else {
                match &issuer.tenant {
                    Some(tenant) => TrustedIssuer::tenant(&issuer.issuer, tenant),
                    // Rejected by config validation
                    None => continue,
                }
            };
            policy = policy.with_issuer(trusted);
        }

        if let Some(realms) = &config.realms {
            policy = policy.with_realm_rule(RealmRule::new(&realms.base_url, realms.tenants.clone()));
        }

        policy
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: TrustedIssuer) -> Self {
        self.issuers
            .insert(normalize(&issuer.issuer), Arc::new(issuer));
        self
    }

    #[must_use]
    pub fn with_realm_rule(mut self, rule: RealmRule) -> Self {
        self.realms = Some(rule);
        self
    }

    /// Match a claimed issuer against the trusted set
    ///
    /// Comparison ignores a trailing slash and the case of scheme and host.
    /// The returned issuer carries the configured canonical URL, which the
    /// token's `iss` must later equal exactly.
    pub fn resolve(&self, claimed: &str) -> Option<Arc<TrustedIssuer>> {
        if let Some(trusted) = self.issuers.get(&normalize(claimed)) {
            return Some(Arc::clone(trusted));
        }

        self.realms
            .as_ref()
            .and_then(|rule| rule.resolve(claimed))
            .map(Arc::new)
    }

    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty() && self.realms.is_none()
    }
}

/// Lowercase scheme and host, drop trailing slashes
fn normalize(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    match url.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            let authority_end = url[authority_start..]
                .find('/')
                .map_or(url.len(), |i| authority_start + i);
            format!(
                "{}{}",
                url[..authority_end].to_ascii_lowercase(),
                &url[authority_end..]
            )
        }
        None => url.to_string(),
    }
}
