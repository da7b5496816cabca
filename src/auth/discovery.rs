//! Issuer discovery
//!
//! Fetches an issuer's OpenID Connect discovery document and its JWKS. This
//! is the only network I/O of the trust cache, and sits behind the
//! [`IssuerFetcher`] trait so tests can substitute a fake backend.

use super::jwks::{parse_algorithm, Jwks};
use async_trait::async_trait;
use jsonwebtoken::Algorithm;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Path of the discovery document, relative to the issuer URL
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Errors fetching an issuer's trust material
///
/// `Clone` so one single-flight outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("Discovery issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    #[error("No usable signing keys in JWKS")]
    NoUsableKeys,

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// OAuth2 / OIDC authorization server metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerMetadata {
    pub issuer: String,

    #[serde(default)]
    pub authorization_endpoint: Option<String>,

    #[serde(default)]
    pub token_endpoint: Option<String>,

    pub jwks_uri: String,

    #[serde(default, rename = "id_token_signing_alg_values_supported")]
    pub signing_algorithms: Vec<String>,
}

impl IssuerMetadata {
    /// Whether the issuer advertises `alg`; no advertisement allows any
    /// asymmetric algorithm
    pub fn allows(&self, alg: Algorithm) -> bool {
        self.signing_algorithms.is_empty()
            || self
                .signing_algorithms
                .iter()
                .any(|name| parse_algorithm(name) == Some(alg))
    }
}

/// Everything fetched for one issuer in one round
#[derive(Debug, Clone)]
pub struct IssuerDocument {
    pub metadata: IssuerMetadata,
    pub jwks: Jwks,
    /// Freshness hint from the JWKS response's `Cache-Control`
    pub max_age: Option<Duration>,
}

/// Fetches an issuer's metadata and key set
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssuerFetcher: Send + Sync {
    /// Fetch metadata and keys for the issuer at `issuer`
    async fn fetch(&self, issuer: &str) -> Result<IssuerDocument, FetchError>;
}

/// [`IssuerFetcher`] over HTTPS, following standard OIDC discovery
pub struct HttpIssuerFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpIssuerFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, timeout })
    }

    /// Discovery document URL for an issuer
    pub fn discovery_url(issuer: &str) -> String {
        format!("{}{}", issuer.trim_end_matches('/'), DISCOVERY_PATH)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::Http {
                        url: url.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl IssuerFetcher for HttpIssuerFetcher {
    async fn fetch(&self, issuer: &str) -> Result<IssuerDocument, FetchError> {
        let discovery_url = Self::discovery_url(issuer);
        debug!(issuer = %issuer, "Fetching discovery document from {}", discovery_url);

        let metadata: IssuerMetadata = self
            .get(&discovery_url)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Parse {
                what: "discovery document",
                message: e.to_string(),
            })?;

        if metadata.issuer != issuer {
            return Err(FetchError::IssuerMismatch {
                expected: issuer.to_string(),
                actual: metadata.issuer,
            });
        }

        debug!(issuer = %issuer, "Fetching JWKS from {}", metadata.jwks_uri);
        let response = self.get(&metadata.jwks_uri).await?;
        let max_age = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_max_age);

        let jwks: Jwks = response.json().await.map_err(|e| FetchError::Parse {
            what: "JWKS",
            message: e.to_string(),
        })?;

        Ok(IssuerDocument {
            metadata,
            jwks,
            max_age,
        })
    }
}

/// Freshness from a `Cache-Control` header value
///
/// `no-cache` / `no-store` yield zero; `max-age=N` yields N seconds.
pub fn parse_max_age(cache_control: &str) -> Option<Duration> {
    let mut max_age = None;
    for directive in cache_control.split(',') {
        let directive = directive.trim().to_ascii_lowercase();
        if directive == "no-cache" || directive == "no-store" {
            return Some(Duration::ZERO);
        }
        if let Some(value) = directive.strip_prefix("max-age=") {
            max_age = value
                .trim_matches('"')
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs);
        }
    }
    max_age
}
