//! Depot server binary.

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::config::AppConfig;
use depot_index::INDEX_BUCKET;
use depot_server::{AppState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot upload-service HTTP server
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DEPOT_CONFIG", default_value = "config/depot.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("depotd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override
    // everything).
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("no config file found at {}", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    if config.server.private_key.is_empty() {
        anyhow::bail!(
            "No private key configured.\n\n\
             Set server.private_key in the config file or DEPOT_SERVER__PRIVATE_KEY \
             in the environment; every API request must present it in the \
             Private-Key header."
        );
    }

    // Initialize the object store and verify connectivity before accepting
    // requests.
    let storage = depot_storage::from_config(&config.storage)
        .await
        .context("failed to initialize object store")?;
    storage
        .health_check()
        .await
        .context("object store health check failed")?;
    tracing::info!(backend = storage.backend_name(), "object store initialized");

    // The dedup index lives in a reserved bucket; make sure it exists so the
    // first upload doesn't race bucket creation.
    storage
        .ensure_bucket(INDEX_BUCKET)
        .await
        .context("failed to ensure index bucket")?;

    let state = AppState::new(config.clone(), storage);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    Ok(())
}
