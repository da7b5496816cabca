//! Per-issuer authentication engine
//!
//! Composes, for one trusted issuer: trust material lookup, key selection,
//! signature verification, claim validation and principal construction.
//! Engines are built the first time an issuer is seen and shared by every
//! request for that issuer.

use super::cache::IssuerTrustCache;
use super::identity::ServiceIdentity;
use super::jwks::SigningKey;
use super::keys::KeySelector;
use super::principal::Principal;
use super::resolver::AuthStage;
use super::token::{Claims, UnverifiedToken};
use super::trust::TrustedIssuer;
use super::validator::{TokenValidator, ValidationPolicy};
use super::AuthError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use std::sync::Arc;
use tracing::debug;

/// Authentication pipeline for one issuer
pub struct AuthenticationEngine {
    issuer: Arc<TrustedIssuer>,
    cache: Arc<IssuerTrustCache>,
    keys: KeySelector,
    validator: TokenValidator,
    service: Arc<ServiceIdentity>,
}

impl AuthenticationEngine {
    pub fn new(
        issuer: Arc<TrustedIssuer>,
        cache: Arc<IssuerTrustCache>,
        policy: Arc<ValidationPolicy>,
        service: Arc<ServiceIdentity>,
    ) -> Self {
        Self {
            keys: KeySelector::new(Arc::clone(&cache)),
            validator: TokenValidator::new(Arc::clone(&issuer), policy),
            issuer,
            cache,
            service,
        }
    }

    pub fn issuer(&self) -> &TrustedIssuer {
        &self.issuer
    }

    /// Authenticate a token claiming this engine's issuer
    ///
    /// `stage` is advanced as each step succeeds, so on error it holds the
    /// last stage reached.
    pub async fn authenticate(
        &self,
        token: &UnverifiedToken,
        stage: &mut AuthStage,
    ) -> Result<Principal, AuthError> {
        let record = self.cache.get_or_fetch(&self.issuer.issuer).await?;
        *stage = AuthStage::IssuerResolved;

        let resolved = self.keys.resolve_key(token, record).await?;
        *stage = AuthStage::KeyResolved;

        let claims = verify_signature(token, &resolved.key)?;
        *stage = AuthStage::SignatureVerified;

        let validated = self
            .validator
            .validate_claims(claims, &resolved.record, &self.service)?;
        *stage = AuthStage::ClaimsValidated;

        let principal = Principal::new(validated, &self.issuer, &self.service);
        *stage = AuthStage::Authenticated;
        Ok(principal)
    }
}

/// Verify the signature only; claims are checked by the validator
fn verify_signature(
    token: &UnverifiedToken,
    key: &SigningKey,
) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(token.algorithm());
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token.raw(), key.decoding_key(), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            debug!(kid = ?token.key_id(), "Signature verification failed: {}", e);
            match e.kind() {
                ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    AuthError::MalformedToken(e.to_string())
                }
                _ => AuthError::SignatureInvalid,
            }
        })
}
