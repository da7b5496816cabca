//! Tenant authentication resolver
//!
//! Per-request entry point. Reads the token's claimed issuer without
//! verifying anything, checks it against the trust policy, then hands the
//! token to that issuer's engine. Engines are created lazily and kept in a
//! map keyed by canonical issuer URL.

use super::cache::{CachePolicy, IssuerTrustCache};
use super::discovery::{FetchError, HttpIssuerFetcher, IssuerFetcher};
use super::engine::AuthenticationEngine;
use super::identity::{IdentityError, ServiceIdentity};
use super::principal::Principal;
use super::token::UnverifiedToken;
use super::trust::TrustPolicy;
use super::validator::ValidationPolicy;
use super::{AuthError, Unauthenticated};
use crate::config::Config;
use crate::metrics;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument, Span};

/// Progress of one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStage {
    Received,
    HeaderParsed,
    IssuerResolved,
    KeyResolved,
    SignatureVerified,
    ClaimsValidated,
    Authenticated,
    Rejected,
}

impl AuthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::HeaderParsed => "header_parsed",
            Self::IssuerResolved => "issuer_resolved",
            Self::KeyResolved => "key_resolved",
            Self::SignatureVerified => "signature_verified",
            Self::ClaimsValidated => "claims_validated",
            Self::Authenticated => "authenticated",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detailed rejection, for logs, metrics and tests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error} (after {stage})")]
pub struct Rejection {
    /// Last stage reached before the failure
    pub stage: AuthStage,
    pub error: AuthError,
}

/// Errors building a resolver from configuration
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Failed to create issuer fetcher: {0}")]
    Fetcher(#[from] FetchError),
}

/// Entry point for authenticating bearer tokens
pub struct TenantAuthResolver {
    cache: Arc<IssuerTrustCache>,
    service: Arc<ServiceIdentity>,
    validation: Arc<ValidationPolicy>,
    engines: DashMap<String, Arc<AuthenticationEngine>>,
}

impl TenantAuthResolver {
    pub fn new(
        cache: Arc<IssuerTrustCache>,
        service: ServiceIdentity,
        validation: ValidationPolicy,
    ) -> Self {
        Self {
            cache,
            service: Arc::new(service),
            validation: Arc::new(validation),
            engines: DashMap::new(),
        }
    }

    /// Build a resolver that fetches issuer material over HTTP
    pub fn from_config(config: &Config) -> Result<Self, ResolverError> {
        let fetcher = HttpIssuerFetcher::new(config.cache.fetch_timeout())?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Build a resolver from configuration with a custom fetcher
    pub fn with_fetcher(
        config: &Config,
        fetcher: Arc<dyn IssuerFetcher>,
    ) -> Result<Self, ResolverError> {
        let service = ServiceIdentity::new(&config.service.namespace, &config.service.name)?;
        let cache = IssuerTrustCache::new(
            TrustPolicy::from_config(&config.trust),
            fetcher,
            CachePolicy::from(&config.cache),
        );

        Ok(Self::new(
            Arc::new(cache),
            service,
            ValidationPolicy::from(&config.trust),
        ))
    }

    pub fn cache(&self) -> &Arc<IssuerTrustCache> {
        &self.cache
    }

    pub fn service(&self) -> &ServiceIdentity {
        &self.service
    }

    /// Authenticate a raw bearer token
    ///
    /// Every failure collapses to [`Unauthenticated`]. The reason is logged
    /// and counted.
    pub async fn authenticate(&self, raw_token: &str) -> Result<Principal, Unauthenticated> {
        let span = info_span!(
            "auth.authenticate",
            auth.stage = tracing::field::Empty,
            auth.outcome = tracing::field::Empty,
        );

        async {
            let result = self.verify(raw_token).await;
            let span = Span::current();

            match result {
                Ok(principal) => {
                    span.record("auth.stage", AuthStage::Authenticated.as_str());
                    span.record("auth.outcome", "success");
                    metrics::record_auth_attempt(true, "none");
                    debug!(issuer = %principal.issuer, "Token authenticated");
                    Ok(principal)
                }
                Err(rejection) => {
                    span.record("auth.stage", rejection.stage.as_str());
                    span.record("auth.outcome", rejection.error.reason());
                    metrics::record_auth_attempt(false, rejection.error.reason());
                    match &rejection.error {
                        AuthError::IssuerUnreachable(_) => {
                            warn!(stage = %rejection.stage, "Token rejected: {}", rejection.error)
                        }
                        _ => debug!(stage = %rejection.stage, "Token rejected: {}", rejection.error),
                    }
                    Err(Unauthenticated)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Authenticate a raw bearer token, keeping the rejection detail
    pub async fn verify(&self, raw_token: &str) -> Result<Principal, Rejection> {
        let mut stage = AuthStage::Received;
        let reject = |stage: AuthStage, error: AuthError| Rejection { stage, error };

        let token = UnverifiedToken::parse(raw_token).map_err(|e| reject(stage, e))?;
        stage = AuthStage::HeaderParsed;

        let engine = self
            .engine(token.issuer())
            .ok_or_else(|| reject(stage, AuthError::IssuerUntrusted(token.issuer().to_string())))?;

        match engine.authenticate(&token, &mut stage).await {
            Ok(principal) => Ok(principal),
            Err(error) => Err(reject(stage, error)),
        }
    }

    /// Drop the engine and the cached record for an issuer
    pub fn evict(&self, issuer_url: &str) -> bool {
        let canonical = self
            .cache
            .trust_policy()
            .resolve(issuer_url)
            .map(|trusted| trusted.issuer.clone())
            .unwrap_or_else(|| issuer_url.to_string());

        let engine = self.engines.remove(&canonical).is_some();
        let record = self.cache.evict(&canonical);
        engine || record
    }

    /// Number of issuers with a built engine
    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// Look up or build the engine for a claimed issuer
    ///
    /// `None` when the trust policy does not accept the issuer.
    fn engine(&self, claimed_issuer: &str) -> Option<Arc<AuthenticationEngine>> {
        let trusted = self.cache.trust_policy().resolve(claimed_issuer)?;

        if let Some(engine) = self.engines.get(&trusted.issuer) {
            return Some(Arc::clone(engine.value()));
        }

        let engine = self
            .engines
            .entry(trusted.issuer.clone())
            .or_insert_with(|| {
                debug!(issuer = %trusted.issuer, "Creating authentication engine");
                Arc::new(AuthenticationEngine::new(
                    Arc::clone(&trusted),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.validation),
                    Arc::clone(&self.service),
                ))
            });
        Some(Arc::clone(engine.value()))
    }
}
