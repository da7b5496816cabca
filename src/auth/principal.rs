//! Authenticated principal

use super::identity::ServiceIdentity;
use super::trust::TrustedIssuer;
use super::validator::ValidatedClaims;
use serde::Serialize;
use serde_json::{Map, Value};

/// The authenticated caller
///
/// Built only from fully validated claims.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub issuer: String,
    /// Tenant the caller acts for
    pub tenant: Option<String>,
    /// Whether the token came from a core (platform) issuer
    pub is_core: bool,
    pub scopes: Vec<String>,
    /// `realm_access.roles`
    pub realm_roles: Vec<String>,
    /// `resource_access[<service urn>].roles`
    pub service_roles: Vec<String>,
    /// Claims not mapped to a field above
    pub claims: Map<String, Value>,
}

impl Principal {
    pub fn new(validated: ValidatedClaims, issuer: &TrustedIssuer, service: &ServiceIdentity) -> Self {
        let ValidatedClaims {
            claims,
            subject,
            tenant,
        } = validated;
        let mut extra = claims.extra;

        let scopes = claims
            .scope
            .as_deref()
            .map(|scope| scope.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let realm_roles = extra
            .remove("realm_access")
            .map(|access| roles(&access))
            .unwrap_or_default();

        let service_roles = extra
            .remove("resource_access")
            .and_then(|access| access.get(service.urn()).map(roles))
            .unwrap_or_default();

        Self {
            subject,
            issuer: issuer.issuer.clone(),
            tenant,
            is_core: issuer.is_core(),
            scopes,
            realm_roles,
            service_roles,
            claims: extra,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Service roles first, then realm roles
    pub fn has_role(&self, role: &str) -> bool {
        self.service_roles.iter().any(|r| r == role) || self.realm_roles.iter().any(|r| r == role)
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

/// Read `{"roles": [..]}`
fn roles(access: &Value) -> Vec<String> {
    access
        .get("roles")
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
