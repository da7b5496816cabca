//! Claim validation
//!
//! Runs after signature verification. Checks, in order: issuer, expiry and
//! not-before, audience, tenant binding, subject. The first failing check
//! rejects the token; nothing is partially accepted.

use super::cache::IssuerRecord;
use super::identity::ServiceIdentity;
use super::token::Claims;
use super::trust::{TenantBinding, TrustedIssuer};
use super::{AuthError, ClaimKind};
use crate::config::TrustConfig;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Claim checks shared by every issuer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Tolerance applied to `exp` and `nbf`
    pub clock_skew: Duration,
    /// Audiences accepted in addition to the service URN
    pub accepted_audiences: Vec<String>,
    pub require_audience: bool,
    /// Name of the claim carrying the tenant id
    pub tenant_claim: String,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from(&TrustConfig::default())
    }
}

impl From<&TrustConfig> for ValidationPolicy {
    fn from(config: &TrustConfig) -> Self {
        Self {
            clock_skew: Duration::from_secs(config.clock_skew_seconds),
            accepted_audiences: config.accepted_audiences.clone(),
            require_audience: config.require_audience,
            tenant_claim: config.tenant_claim.clone(),
        }
    }
}

/// Claims that passed every check
#[derive(Debug, Clone)]
pub struct ValidatedClaims {
    pub claims: Claims,
    pub subject: String,
    /// Tenant the token acts for; `None` for core tokens without a tenant claim
    pub tenant: Option<String>,
}

/// Validator for one trusted issuer
#[derive(Debug, Clone)]
pub struct TokenValidator {
    issuer: Arc<TrustedIssuer>,
    policy: Arc<ValidationPolicy>,
}

impl TokenValidator {
    pub fn new(issuer: Arc<TrustedIssuer>, policy: Arc<ValidationPolicy>) -> Self {
        Self { issuer, policy }
    }

    pub fn issuer(&self) -> &TrustedIssuer {
        &self.issuer
    }

    /// Validate claims against the record whose key verified the signature
    pub fn validate_claims(
        &self,
        claims: Claims,
        record: &IssuerRecord,
        service: &ServiceIdentity,
    ) -> Result<ValidatedClaims, AuthError> {
        self.validate_claims_at(claims, record, service, chrono::Utc::now().timestamp())
    }

    /// [`validate_claims`](Self::validate_claims) at a fixed Unix time
    pub fn validate_claims_at(
        &self,
        claims: Claims,
        record: &IssuerRecord,
        service: &ServiceIdentity,
        now: i64,
    ) -> Result<ValidatedClaims, AuthError> {
        let reject = |kind: ClaimKind| -> Result<ValidatedClaims, AuthError> {
            Err(AuthError::ClaimInvalid(kind))
        };

        if claims.iss.as_deref() != Some(record.issuer()) {
            return reject(ClaimKind::IssuerMismatch);
        }

        let skew = i64::try_from(self.policy.clock_skew.as_secs()).unwrap_or(i64::MAX);
        match claims.exp {
            None => return reject(ClaimKind::MissingExpiry),
            Some(exp) if now >= exp.saturating_add(skew) => return reject(ClaimKind::Expired),
            Some(_) => {}
        }
        if let Some(nbf) = claims.nbf {
            if nbf.saturating_sub(skew) > now {
                return reject(ClaimKind::NotYetValid);
            }
        }

        if self.policy.require_audience && !self.audience_accepted(&claims, service) {
            return reject(ClaimKind::Audience);
        }

        let tenant = self.tenant(&claims)?;

        let subject = match claims.sub.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => sub.to_string(),
            _ => return reject(ClaimKind::MissingSubject),
        };

        Ok(ValidatedClaims {
            claims,
            subject,
            tenant,
        })
    }

    fn audience_accepted(&self, claims: &Claims, service: &ServiceIdentity) -> bool {
        claims.aud.iter().any(|aud| {
            aud == service.urn() || self.policy.accepted_audiences.iter().any(|a| a == aud)
        })
    }

    /// Resolve the tenant a token acts for
    fn tenant(&self, claims: &Claims) -> Result<Option<String>, AuthError> {
        let claimed = match claims.extra.get(&self.policy.tenant_claim) {
            None | Some(Value::Null) => None,
            Some(Value::String(tenant)) => Some(tenant.as_str()),
            Some(_) => return Err(AuthError::ClaimInvalid(ClaimKind::TenantMismatch)),
        };

        match (&self.issuer.binding, claimed) {
            (TenantBinding::Tenant(bound), None) => Ok(Some(bound.clone())),
            (TenantBinding::Core { .. }, None) => Ok(None),
            (_, Some(tenant)) if self.issuer.accepts_tenant(tenant) => Ok(Some(tenant.to_string())),
            (_, Some(_)) => Err(AuthError::ClaimInvalid(ClaimKind::TenantMismatch)),
        }
    }
}
