//! Port-group utility daemon
//!
//! Serves the vCenter inventory and NIC reassignment over HTTP.

use clap::Parser;
use portgroup_common::Database;
use portgroup_daemon::cache::SystemClock;
use portgroup_daemon::config::DaemonConfig;
use portgroup_daemon::http::{self, AppState};
use portgroup_daemon::service::InventoryService;
use portgroup_daemon::vsphere::VimConnector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "portgroupd")]
#[command(about = "vCenter port-group utility daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path (default: <store>/config.toml)
    #[arg(short, long, env = "PORTGROUP_CONFIG")]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long, env = "PORTGROUP_STORE")]
    store: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory with the web UI assets
    #[arg(long)]
    static_dir: Option<PathBuf>,

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

    // Initialize logging
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

    info!("Port-group utility daemon v{}", portgroup_common::VERSION);

    let store_path = cli
        .store
        .clone()
        .unwrap_or_else(portgroup_common::default_store_path);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| store_path.join("config.toml"));

    let mut config = DaemonConfig::load(&config_path)?;
    if cli.store.is_some() {
        config.store_path = store_path;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(dir) = cli.static_dir {
        config.static_dir = Some(dir);
    }

    tokio::fs::create_dir_all(&config.store_path).await?;

    let db = Database::open(config.db_path())?;
    let connector = Arc::new(VimConnector::new(config.vcenter.clone()));
    let service = InventoryService::new(db, connector, &config, Arc::new(SystemClock))?;

    let app = http::router(AppState {
        service,
        static_dir: config.static_dir.clone(),
    });

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

    info!("Daemon shutdown complete");
    Ok(())
}
