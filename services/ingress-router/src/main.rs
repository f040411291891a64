//! Ingress router binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ingress_router::config_loader::load_router_config;
use ingress_router::{start_server, RouterConfig, ServerState};
use storage::RedisChannelPublisher;

#[derive(Parser, Debug)]
#[command(name = "ingress-router")]
#[command(about = "Classifies provider payloads into main, fast-path and dead-letter channels")]
struct Args {
    /// Configuration file path (environment variables are used when absent)
    #[arg(short, long, env = "INGRESS_CONFIG")]
    config: Option<String>,

    /// Override the HTTP listen port
    #[arg(short, long, env = "INGRESS_PORT")]
    port: Option<u16>,

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

    info!("Starting ingress router");

    let mut config = match &args.config {
        Some(path) => load_router_config(path)?,
        None => RouterConfig::from_env()?,
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        routes = ?config.routes.keys().collect::<Vec<_>>(),
        streams = ?config.streams,
        max_payload_bytes = config.max_payload_bytes,
        "Loaded configuration"
    );

    let publisher = RedisChannelPublisher::connect(&config.redis_url, config.streams.clone())
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;

    let port = config.port;
    let state = Arc::new(ServerState::new(config, Arc::new(publisher)).with_metrics(prometheus_handle));

    start_server(state, port).await
}
