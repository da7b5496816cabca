//! Authentication module
//!
//! Tenant-aware bearer token authentication. The token's unverified issuer
//! claim only selects which issuer's trust material to load; the signature is
//! then verified with that issuer's keys and every claim is validated again.
//!
//! Leaves first:
//! - [`cache`] - per-issuer metadata and signing keys, single-flight fetch
//! - [`keys`] - signing key selection with one forced refresh on rotation
//! - [`validator`] - claim checks against the issuer's trust configuration
//! - [`engine`] - per-issuer verify → validate → principal pipeline
//! - [`resolver`] - per-request entry point

use thiserror::Error;

pub mod cache;
pub mod discovery;
pub mod engine;
pub mod identity;
pub mod jwks;
pub mod keys;
pub mod principal;
pub mod resolver;
pub mod token;
pub mod trust;
pub mod validator;

pub use identity::ServiceIdentity;
pub use principal::Principal;
pub use resolver::{AuthStage, Rejection, TenantAuthResolver};

/// The claim check that rejected a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    /// `iss` differs from the issuer whose key verified the token
    IssuerMismatch,
    /// `exp` is in the past
    Expired,
    /// No `exp` claim
    MissingExpiry,
    /// `nbf` is in the future
    NotYetValid,
    /// `aud` names neither this service nor an accepted audience
    Audience,
    /// Tenant claim is not bound to the issuer
    TenantMismatch,
    /// No `sub` claim
    MissingSubject,
}

impl ClaimKind {
    /// Stable snake_case name, used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssuerMismatch => "issuer_mismatch",
            Self::Expired => "expired",
            Self::MissingExpiry => "missing_expiry",
            Self::NotYetValid => "not_yet_valid",
            Self::Audience => "audience",
            Self::TenantMismatch => "tenant_mismatch",
            Self::MissingSubject => "missing_subject",
        }
    }
}

impl std::fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication errors
///
/// Internal detail only. Callers outside the crate see [`Unauthenticated`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Issuer not trusted: {0}")]
    IssuerUntrusted(String),

    #[error("Issuer unreachable: {0}")]
    IssuerUnreachable(String),

    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid signature")]
    SignatureInvalid,

    #[error("Invalid claim: {0}")]
    ClaimInvalid(ClaimKind),
}

impl AuthError {
    /// Short reason label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::IssuerUntrusted(_) => "issuer_untrusted",
            Self::IssuerUnreachable(_) => "issuer_unreachable",
            Self::KeyNotFound(_) => "key_not_found",
            Self::SignatureInvalid => "signature_invalid",
            Self::ClaimInvalid(kind) => kind.as_str(),
        }
    }
}

/// Rejection handed to unauthenticated clients
///
/// Carries no detail on purpose; see [`Rejection`] for the internal reason.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unauthenticated")]
pub struct Unauthenticated;
