//! Tenant Gate Library
//!
//! Bearer token authentication for multi-tenant services, where each tenant
//! may be served by a different OAuth2 / OIDC issuer.
//!
//! # Features
//!
//! - **Per-issuer trust**: metadata and signing keys discovered and cached per issuer
//! - **Single-flight fetch**: one fetch per issuer no matter how many requests wait
//! - **Key rotation**: one forced refresh when a token names an unknown key
//! - **Tenant binding**: tokens must belong to the tenant their issuer serves
//! - **Forward-auth server**: `GET /auth` for reverse proxies
//!
//! # Example
//!
//! ```no_run
//! use tenant_gate::auth::TenantAuthResolver;
//! use tenant_gate::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let resolver = TenantAuthResolver::from_config(&config)?;
//!     match resolver.authenticate("eyJ...").await {
//!         Ok(principal) => println!("authenticated {}", principal.subject),
//!         Err(_) => println!("rejected"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod auth;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use auth::{Principal, TenantAuthResolver};
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
