//! Station sync binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use station_cache::{MergeCache, StationSink};
use station_sync::config_loader::{load_sync_config, validate_sync_config};
use station_sync::server::{start_server, ServerState};
use station_sync::{run_listener, ListenerStats, MetadataHandler, OriginHandler, SyncConfig};
use storage::{ObjectRawStore, ObjectStorage, RawPayloadStore, StreamConsumer, TimeSeriesClient};

#[derive(Parser, Debug)]
#[command(name = "station-sync")]
#[command(about = "Keeps station metadata and measurements in sync with the time-series store")]
struct Args {
    /// Configuration file path (environment variables are used when absent)
    #[arg(short, long, env = "STATION_SYNC_CONFIG")]
    config: Option<String>,

    /// Override the status server port
    #[arg(short, long, env = "STATION_SYNC_PORT")]
    port: Option<u16>,

    /// Override the consumer name within the group
    #[arg(long, env = "CONSUMER_NAME")]
    consumer_name: Option<String>,

    /// Log level
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    info!("Starting station sync");

    let mut config = match &args.config {
        Some(path) => load_sync_config(path)?,
        None => {
            let config = SyncConfig::from_env()?;
            validate_sync_config(&config)?;
            config
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(name) = args.consumer_name {
        config.consumer_name = name;
    }

    let origins = config.origin_ids();
    info!(origins = ?origins, metadata = config.metadata.is_some(), "Loaded configuration");

    let client = Arc::new(TimeSeriesClient::new(config.timeseries.clone())?);
    let sink: Arc<dyn StationSink> = client.clone();
    let storage = ObjectStorage::new(&config.storage)?;
    let raw_store: Arc<dyn RawPayloadStore> = Arc::new(ObjectRawStore::new(storage));
    let cache = Arc::new(MergeCache::new(client.clone(), sink.clone()));

    let data_types = config.data_types();
    if !data_types.is_empty() {
        sink.sync_data_types(&data_types)
            .await
            .context("Failed to sync data types")?;
        info!(count = data_types.len(), "Data types synced");
    }

    let stations = cache
        .refresh(&origins)
        .await
        .context("Initial station refresh failed")?;
    info!(stations = stations, "Station cache loaded");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let stats = Arc::new(ListenerStats::new());
    let mut listeners = Vec::new();

    for origin in &config.origins {
        let consumer = StreamConsumer::connect(
            &config.redis_url,
            origin.stream.clone(),
            config.consumer_group.clone(),
            config.consumer_name.clone(),
        )
        .await
        .with_context(|| format!("Failed to subscribe to {}", origin.stream))?;

        let handler = Arc::new(OriginHandler::new(
            origin.clone(),
            cache.clone(),
            raw_store.clone(),
            sink.clone(),
        ));
        listeners.push(tokio::spawn(run_listener(
            consumer,
            handler,
            stats.clone(),
            shutdown_tx.subscribe(),
        )));
    }

    if let Some(metadata) = &config.metadata {
        let consumer = StreamConsumer::connect(
            &config.redis_url,
            metadata.stream.clone(),
            config.consumer_group.clone(),
            config.consumer_name.clone(),
        )
        .await
        .with_context(|| format!("Failed to subscribe to {}", metadata.stream))?;

        let handler = Arc::new(MetadataHandler::new(
            metadata.clone(),
            origins.clone(),
            cache.clone(),
            raw_store.clone(),
        ));
        listeners.push(tokio::spawn(run_listener(
            consumer,
            handler,
            stats.clone(),
            shutdown_tx.subscribe(),
        )));
    }

    let server_state = Arc::new(ServerState {
        cache: cache.clone(),
        listeners: stats.clone(),
        origins,
        metrics: Some(prometheus_handle),
    });
    let port = config.port;
    tokio::spawn(async move {
        if let Err(e) = start_server(server_state, port).await {
            error!(error = %e, "Status server failed");
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    shutdown_tx.send(()).ok();

    for result in futures::future::join_all(listeners).await {
        if let Err(e) = result {
            error!(error = %e, "Listener task panicked");
        }
    }

    info!(stats = ?cache.stats(), "Station sync stopped");
    Ok(())
}
