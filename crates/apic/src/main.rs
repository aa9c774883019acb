//! APIC tenant service

use clap::Parser;
use portgroup_apic::{routes, ApicClient, ApicConfig, CertSigner};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "portgroup-apic")]
#[command(about = "Republishes APIC tenants for the port-group utility")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    apic: ApicConfig,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("APIC tenant service v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.apic;
    let signer = CertSigner::load(&config.key_file, &config.cert_user)?;
    let client = ApicClient::new(&config, signer)?;
    info!(apic = %config.apic_url, user = %config.cert_user, "APIC client ready");

    let app = routes::router(Arc::new(client));
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("Listening on http://{}", config.listen);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}
