//! Weather Bridge Worker
//!
//! Consumes weather readings from RabbitMQ and forwards them to the backend.
//! One message is in flight at a time (prefetch=1, manual acknowledgment).
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RABBITMQ_URL` | - | AMQP URI (required) |
//! | `QUEUE_NAME` | `weather` | Durable queue to consume |
//! | `BACKEND_URL` | `http://backend:3000` | Sink base URL |
//! | `SINK_PATH` | `/weather/logs` | Sink path |
//! | `SINK_TIMEOUT_SECS` | `10` | Per-request timeout |
//! | `SINK_CONNECT_TIMEOUT_SECS` | `5` | Connect timeout |
//! | `RETRY_MAX_ATTEMPTS` | `3` | Delivery attempts per message |
//! | `RETRY_INITIAL_BACKOFF_MS` | `1000` | First retry wait, doubled each retry |
//! | `METRICS_PORT` | - | Prometheus exporter port (disabled if unset) |
//! | `SHUTDOWN_TIMEOUT_SECS` | `30` | Grace period for the in-flight message |
//! | `LOG_FORMAT` | `text` | `json` for JSON log lines |
//! | `RUST_LOG` | `info` | Log filter |

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wb_common::Shutdown;
use wb_queue::{AmqpConfig, AmqpConsumer};
use wb_router::{ConsumerLoop, HttpMediator, MessageProcessor, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let env_source = load_dotenv();
    init_logging();

    match env_source {
        Some(source) => info!(source = %source, "Loaded .env"),
        None => info!("No .env file found, using process environment"),
    }

    let config = WorkerConfig::from_env()?;
    info!(
        operation = "init",
        rabbitmq_url = %config.redacted_rabbitmq_url(),
        queue_name = %config.queue_name,
        sink_url = %config.sink_url,
        max_attempts = config.retry.max_attempts,
        "Worker initialized"
    );

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        wb_router::metrics::describe();
        info!(port, "Metrics exporter listening");
    }

    let shutdown = Shutdown::new();

    let mediator = Arc::new(HttpMediator::new(config.mediator_config())?);
    let processor = Arc::new(MessageProcessor::with_mediator(
        mediator,
        config.retry.clone(),
        shutdown.signal(),
    ));

    let consumer = AmqpConsumer::connect(&AmqpConfig::new(
        config.rabbitmq_url.clone(),
        config.queue_name.clone(),
    ))
    .await
    .map_err(|e| {
        error!(operation = "connect_rabbitmq", error = %e, "Failed to start consumer");
        e
    })?;

    let consumer_loop = ConsumerLoop::new(Box::new(consumer), processor, shutdown.signal());
    let mut loop_handle = tokio::spawn(consumer_loop.run());

    info!("Weather Bridge Worker started. Press Ctrl+C to shutdown.");

    let joined = tokio::select! {
        _ = shutdown_signal() => {
            info!(operation = "shutdown", "Shutting down gracefully");
            shutdown.trigger();
            match tokio::time::timeout(config.shutdown_timeout, &mut loop_handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        timeout_secs = config.shutdown_timeout.as_secs(),
                        "In-flight message did not finish in time, aborting"
                    );
                    loop_handle.abort();
                    return Ok(());
                }
            }
        }
        joined = &mut loop_handle => joined,
    };

    match joined {
        Ok(Ok(stats)) => {
            info!(received = stats.received, acknowledged = stats.acknowledged, "Worker shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Consumer loop failed");
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("consumer loop task panicked: {}", e)),
    }
}

/// Load `../.env` if present, otherwise `./.env`
fn load_dotenv() -> Option<String> {
    let parent = Path::new("..").join(".env");
    if parent.exists() && dotenvy::from_path(&parent).is_ok() {
        return Some(parent.display().to_string());
    }
    dotenvy::dotenv().ok().map(|path| path.display().to_string())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
