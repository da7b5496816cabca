//! Configuration module for Tenant Gate
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub access: AccessConfig,
    pub trust: TrustConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` references
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        ConfigLoader::parse(content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (label, part) in [
            ("service.namespace", &self.service.namespace),
            ("service.name", &self.service.name),
        ] {
            if part.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} cannot be empty",
                    label
                )));
            }
            if part.contains(':') {
                return Err(ConfigError::ValidationError(format!(
                    "{} '{}' cannot contain ':'",
                    label, part
                )));
            }
        }

        if self.trust.issuers.is_empty() && self.trust.realms.is_none() {
            return Err(ConfigError::ValidationError(
                "At least one trusted issuer or a realm rule must be configured".into(),
            ));
        }

        for issuer in &self.trust.issuers {
            if !is_valid_http_url(&issuer.issuer) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid issuer '{}': must start with http:// or https://",
                    issuer.issuer
                )));
            }

            if !issuer.core && issuer.tenant.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::ValidationError(format!(
                    "Issuer '{}' must name a tenant or be marked core",
                    issuer.issuer
                )));
            }
        }

        if let Some(ref realms) = self.trust.realms {
            if !is_valid_http_url(&realms.base_url) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid realm base_url '{}': must start with http:// or https://",
                    realms.base_url
                )));
            }
        }

        if self.trust.tenant_claim.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "trust.tenant_claim cannot be empty".into(),
            ));
        }

        if self.cache.max_ttl_seconds < self.cache.min_ttl_seconds {
            return Err(ConfigError::ValidationError(format!(
                "cache.max_ttl_seconds ({}) must not be less than cache.min_ttl_seconds ({})",
                self.cache.max_ttl_seconds, self.cache.min_ttl_seconds
            )));
        }

        if self.cache.fetch_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "cache.fetch_timeout_seconds must be greater than zero".into(),
            ));
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid logging format '{}': must be 'json' or 'pretty'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:8080".into()
}

/// Identity of the protected service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub namespace: String,
    pub name: String,
}

/// Path-based access rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Ant-style patterns of paths that require authentication
    #[serde(default)]
    pub api_patterns: Vec<String>,
    /// Paths readable without a token
    #[serde(default)]
    pub public_paths: Vec<String>,
}

/// Trusted issuers and claim validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    #[serde(default)]
    pub issuers: Vec<IssuerConfig>,
    #[serde(default)]
    pub realms: Option<RealmConfig>,
    /// Audiences accepted besides the service URN
    #[serde(default)]
    pub accepted_audiences: Vec<String>,
    #[serde(default = "default_true")]
    pub require_audience: bool,
    #[serde(default = "default_tenant_claim")]
    pub tenant_claim: String,
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            issuers: Vec::new(),
            realms: None,
            accepted_audiences: Vec::new(),
            require_audience: true,
            tenant_claim: default_tenant_claim(),
            clock_skew_seconds: default_clock_skew(),
        }
    }
}

/// One explicitly trusted issuer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    pub issuer: String,
    /// Tenant bound to a non-core issuer
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub core: bool,
    /// Tenants a core issuer's tokens may claim
    #[serde(default)]
    pub allowed_tenants: Vec<String>,
}

/// Realm-per-tenant rule: `{base_url}/{realm}` is trusted for the mapped tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmConfig {
    pub base_url: String,
    #[serde(default)]
    pub tenants: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_tenant_claim() -> String {
    "tenant_id".into()
}

fn default_clock_skew() -> u64 {
    60
}

/// Issuer trust cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness when the JWKS response carries no `Cache-Control` hint
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_min_ttl")]
    pub min_ttl_seconds: u64,
    #[serde(default = "default_max_ttl")]
    pub max_ttl_seconds: u64,
    /// Stale-but-usable window after expiry
    #[serde(default = "default_grace")]
    pub grace_seconds: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    /// Minimum wait between key-miss refreshes of one issuer
    #[serde(default = "default_min_refresh_interval")]
    pub min_refresh_interval_seconds: u64,
    /// Zero disables the background refresher
    #[serde(default)]
    pub background_refresh_seconds: u64,
}

impl CacheConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn background_refresh(&self) -> Option<Duration> {
        (self.background_refresh_seconds > 0)
            .then(|| Duration::from_secs(self.background_refresh_seconds))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl(),
            min_ttl_seconds: default_min_ttl(),
            max_ttl_seconds: default_max_ttl(),
            grace_seconds: default_grace(),
            retry_interval_seconds: default_retry_interval(),
            fetch_timeout_seconds: default_fetch_timeout(),
            min_refresh_interval_seconds: default_min_refresh_interval(),
            background_refresh_seconds: 0,
        }
    }
}

fn default_ttl() -> u64 {
    3600
}

fn default_min_ttl() -> u64 {
    60
}

fn default_max_ttl() -> u64 {
    86400
}

fn default_grace() -> u64 {
    86400
}

fn default_retry_interval() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_min_refresh_interval() -> u64 {
    10
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}
