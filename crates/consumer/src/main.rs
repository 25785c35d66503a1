//! Depot consumer binary.
//!
//! Subscribes to the upload exchange, composes staged chunks into final
//! objects, moves pre-staged transfers into place, and publishes completion
//! notifications.

use anyhow::{Context, Result};
use clap::Parser;
use depot_broker::{
    Broker, CHUNK_COMPLETE_QUEUE, COMPOSE_COMPLETED_QUEUE, TRANSFER_QUEUE, UPLOAD_EXCHANGE,
    declare_topology,
};
use depot_consumer::{ChunkCompleteHandler, ComposeEngine, TransferEngine, TransferHandler};
use depot_core::config::AppConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot upload-service consumer
#[derive(Parser, Debug)]
#[command(name = "depot-consumer")]
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
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("depot consumer v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    // Main and staging gateways. The staging store falls back to the main
    // store when not configured separately.
    let main_store = depot_storage::from_config(&config.storage)
        .await
        .context("failed to initialize main object store")?;
    let staging_store = depot_storage::from_config(config.staging_store())
        .await
        .context("failed to initialize staging object store")?;
    tracing::info!(backend = main_store.backend_name(), "object stores initialized");

    let broker = Broker::connect(&config.broker)
        .await
        .context("failed to connect to broker")?;
    declare_topology(&broker)
        .await
        .context("failed to declare broker topology")?;

    let chunk_handler =
        ChunkCompleteHandler::new(ComposeEngine::new(staging_store.clone(), main_store.clone()));
    let transfer_handler =
        TransferHandler::new(TransferEngine::new(staging_store, main_store));

    let consumer_tag = format!("depot-consumer-{}", uuid::Uuid::new_v4());
    let mut chunk_deliveries = broker
        .consume(CHUNK_COMPLETE_QUEUE, &format!("{consumer_tag}-compose"))
        .await?;
    let mut transfer_deliveries = broker
        .consume(TRANSFER_QUEUE, &format!("{consumer_tag}-transfer"))
        .await?;

    // Graceful shutdown: cancel on SIGINT/SIGTERM, let the in-flight
    // delivery finish, then close broker handles.
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    tracing::info!("consumer started, waiting for messages");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested, stopping consumer");
                break;
            }
            delivery = chunk_deliveries.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        handle_chunk_complete(&broker, &chunk_handler, delivery).await;
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "chunk-complete consumer error");
                    }
                    None => {
                        tracing::warn!("chunk-complete delivery stream closed");
                        break;
                    }
                }
            }
            delivery = transfer_deliveries.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        handle_transfer(&transfer_handler, delivery).await;
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "transfer consumer error");
                    }
                    None => {
                        tracing::warn!("transfer delivery stream closed");
                        break;
                    }
                }
            }
        }
    }

    broker.close().await.context("failed to close broker")?;
    tracing::info!("consumer stopped");
    Ok(())
}

/// Process one chunk-complete delivery: compose, publish the completion
/// notification, and only then acknowledge.
async fn handle_chunk_complete(
    broker: &Broker,
    handler: &ChunkCompleteHandler,
    delivery: Delivery,
) {
    let completion = match handler.handle(&delivery.data).await {
        Ok(completion) => completion,
        Err(err) => {
            // Unparsable payload: nack without requeue so a poison message
            // cannot loop; dead-lettering is broker configuration.
            tracing::error!(error = %err, "failed to parse chunk-complete message");
            nack(&delivery).await;
            return;
        }
    };

    let payload = match serde_json::to_vec(&completion) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize completion notification");
            nack(&delivery).await;
            return;
        }
    };

    match broker
        .publish(UPLOAD_EXCHANGE, COMPOSE_COMPLETED_QUEUE, &payload)
        .await
    {
        Ok(()) => {
            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                tracing::error!(error = %err, "failed to ack chunk-complete delivery");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to publish completion notification");
            nack(&delivery).await;
        }
    }
}

/// Process one transfer delivery.
async fn handle_transfer(handler: &TransferHandler, delivery: Delivery) {
    match handler.handle(&delivery.data).await {
        Ok(()) => {
            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                tracing::error!(error = %err, "failed to ack transfer delivery");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "transfer failed");
            nack(&delivery).await;
        }
    }
}

async fn nack(delivery: &Delivery) {
    let options = BasicNackOptions {
        requeue: false,
        ..Default::default()
    };
    if let Err(err) = delivery.nack(options).await {
        tracing::error!(error = %err, "failed to nack delivery");
    }
}

fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %path, "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("no config file found at {path}, using environment");
    }

    figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        shutdown.cancel();
                        return;
                    }
                };

            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        shutdown.cancel();
    });
}
