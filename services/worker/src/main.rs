//! Superkey Worker
//!
//! Accepts superkey messages over HTTP, queues them, and hands them to the
//! engine's dispatcher until shutdown.

use anyhow::{Context, Result};
use async_channel::{bounded, Sender, TrySendError};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use superkey_engine::config::{AzureConfig, ForgeConfig, InventoryConfig};
use superkey_engine::dispatch::{Dispatcher, DispatcherConfig, Message};
use superkey_engine::inventory::InventoryClient;
use superkey_engine::provider::amazon::{self, AmazonProviderFactory};
use superkey_engine::provider::azure::{
    self, prepare_template, AzCliLauncher, AzureProviderFactory, TemplateSource,
    DEFAULT_TEMPLATE_PATH,
};
use superkey_engine::provider::ProviderRegistry;
use superkey_engine::SuperkeyEngine;

/// Superkey Worker - provisions tenant cloud access from superkey credentials
#[derive(Parser, Debug)]
#[command(name = "superkey-worker", version, about)]
struct Args {
    /// Sources API scheme
    #[arg(long, default_value = "http", env = "SOURCES_SCHEME")]
    sources_scheme: String,

    /// Sources API host
    #[arg(long, default_value = "localhost", env = "SOURCES_HOST")]
    sources_host: String,

    /// Sources API port
    #[arg(long, default_value = "8000", env = "SOURCES_PORT")]
    sources_port: u16,

    /// Pre-shared key for the Sources API
    #[arg(long, env = "SOURCES_PSK", hide_env_values = true)]
    sources_psk: Option<String>,

    /// Attempts per Sources API call
    #[arg(long, default_value = "3", env = "SOURCES_MAX_ATTEMPTS")]
    max_attempts: u32,

    /// Seconds between Sources API attempts
    #[arg(long, default_value = "1", env = "SOURCES_RETRY_DELAY")]
    retry_delay: u64,

    /// Address the message intake listens on
    #[arg(long, default_value = "0.0.0.0:8000", env = "LISTEN_ADDRESS")]
    listen: SocketAddr,

    /// Messages buffered before the intake pushes back
    #[arg(long, default_value = "100", env = "QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Seconds one request may take end to end
    #[arg(long, default_value = "900", env = "REQUEST_DEADLINE")]
    deadline: u64,

    /// Skip create_application requests
    #[arg(long, default_value = "false", env = "DISABLE_RESOURCE_CREATION")]
    disable_creation: bool,

    /// Skip destroy_application requests
    #[arg(long, default_value = "false", env = "DISABLE_RESOURCE_DELETION")]
    disable_deletion: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Seconds to let IAM settle before reporting
    #[arg(long, default_value = "7", env = "AWS_WAIT_TIME")]
    aws_wait_time: u64,

    /// Region for the Amazon clients
    #[arg(long, default_value = "us-east-1", env = "AWS_REGION")]
    aws_region: String,

    /// Mounted Azure lighthouse template
    #[arg(long, env = "AZURE_TEMPLATE_PATH")]
    azure_template: Option<PathBuf>,

    /// Cloud-meter base URL, used when no template is mounted
    #[arg(long, env = "CLOUD_METER_URL")]
    cloud_meter_url: Option<String>,

    /// Cloud-meter sysconfig path
    #[arg(long, default_value = "/api/cloudigrade/v2/sysconfig/", env = "CLOUD_METER_SYSCONFIG_PATH")]
    cloud_meter_sysconfig_path: String,
}

#[derive(Clone)]
struct AppState {
    sender: Sender<Message>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .json()
        .init();

    info!(
        sources_host = %args.sources_host,
        listen = %args.listen,
        disable_creation = args.disable_creation,
        disable_deletion = args.disable_deletion,
        "Starting Superkey Worker"
    );

    let inventory_config = InventoryConfig::new(&args.sources_scheme, &args.sources_host, args.sources_port)
        .psk(args.sources_psk.clone());
    let inventory_config = InventoryConfig {
        max_attempts: args.max_attempts.max(1),
        retry_delay: Duration::from_secs(args.retry_delay),
        ..inventory_config
    };
    let inventory = Arc::new(InventoryClient::new(inventory_config).context("Failed to build Sources client")?);

    let azure_config = AzureConfig {
        template_path: azure_template(&args).await,
        ..AzureConfig::default()
    };
    let forge_config = ForgeConfig {
        iam_settle_wait: Duration::from_secs(args.aws_wait_time),
        aws_region: args.aws_region.clone(),
        request_deadline: Duration::from_secs(args.deadline),
    };

    let registry = ProviderRegistry::new()
        .register(
            amazon::PROVIDER_NAME,
            Arc::new(AmazonProviderFactory::new(&forge_config.aws_region)),
        )
        .register(
            azure::PROVIDER_NAME,
            Arc::new(AzureProviderFactory::new(
                Arc::new(AzCliLauncher::new(azure_config.clone())),
                azure_config.template_path.clone(),
            )),
        );
    info!(providers = ?registry.names(), "Registered superkey providers");

    let engine = Arc::new(SuperkeyEngine::new(registry, inventory, forge_config));
    let dispatcher = Arc::new(Dispatcher::new(
        engine,
        DispatcherConfig {
            disable_creation: args.disable_creation,
            disable_deletion: args.disable_deletion,
        },
    ));

    let (sender, receiver) = bounded(args.queue_capacity.max(1));
    let consumer = tokio::spawn(dispatcher.run(receiver));

    let app = router(AppState {
        sender: sender.clone(),
    });

    info!("Superkey Worker listening on {}", args.listen);
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Intake stopped, closing queue");
    sender.close();
    consumer.await.context("Dispatcher task failed")?;

    info!("Superkey Worker stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/superkey/messages", post(enqueue))
        .with_state(state)
}

/// Mounted template first, then cloud-meter. Azure requests fail until one works.
async fn azure_template(args: &Args) -> Option<PathBuf> {
    let source = match (&args.azure_template, &args.cloud_meter_url) {
        (Some(path), _) => TemplateSource::Local(path.clone()),
        (None, Some(base_url)) => TemplateSource::CloudMeter {
            base_url: base_url.trim_end_matches('/').to_string(),
            sysconfig_path: args.cloud_meter_sysconfig_path.clone(),
        },
        (None, None) => {
            warn!("No Azure template source configured, Azure requests will fail");
            return None;
        }
    };

    match prepare_template(&source, Path::new(DEFAULT_TEMPLATE_PATH)).await {
        Ok(path) => {
            info!(path = ?path, "Azure template ready");
            Some(path)
        }
        Err(e) => {
            warn!(error = %e, "Failed to prepare Azure template, Azure requests will fail");
            None
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "superkey-worker",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Queue one message. Headers become message headers, the body its value.
async fn enqueue(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let message = to_message(&headers, body);

    match state.sender.try_send(message) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "queued"})),
        ),
        Err(TrySendError::Full(_)) => {
            warn!("Superkey queue is full, rejecting message");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "queue full"})),
            )
        }
        Err(TrySendError::Closed(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "shutting down"})),
        ),
    }
}

fn to_message(headers: &HeaderMap, body: Bytes) -> Message {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .fold(Message::new(body.to_vec()), |message, (name, value)| {
            message.with_header(name, value)
        })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
