//! Tenant Gate - forward-auth server for multi-tenant bearer tokens

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tenant_gate::{config::Config, logging, Server, TenantAuthResolver};
use tracing::info;

/// Tenant Gate - per-tenant issuer resolution and bearer token validation
#[derive(Parser, Debug)]
#[command(name = "tenant-gate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level or filter directive; overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;

    if args.check_config {
        println!("Configuration OK: {:?}", args.config);
        return Ok(());
    }

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    logging::init(&config.logging)?;

    info!("Starting Tenant Gate v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {:?}", args.config);

    let resolver = Arc::new(TenantAuthResolver::from_config(&config)?);
    info!(service = %resolver.service(), "Authenticating for service");

    let _refresher = config
        .cache
        .background_refresh()
        .map(|every| resolver.cache().spawn_background_refresh(every));

    let server = Server::bind(&config, resolver).await?;
    server.run().await?;

    Ok(())
}
