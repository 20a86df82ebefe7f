//! heatwatch service - MQTT ingestion, aggregation and HTTP API.
//!
//! Run with: `cargo run -p heatwatch-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use heatwatch_core::Aggregator;
use heatwatch_service::{AppState, Config, app};
use heatwatch_store::Store;

/// How long to wait for queued events and notifications after shutdown.
const ENGINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// heatwatch service - MQTT ingestion, aggregation and HTTP API.
#[derive(Parser, Debug)]
#[command(name = "heatwatch-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable the rollup scheduler.
    #[arg(long)]
    no_aggregation: bool,

    /// Disable MQTT ingestion (API only mode).
    #[arg(long)]
    no_mqtt: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("heatwatch_service=info".parse()?)
                .add_directive("heatwatch_core=info".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if args.no_aggregation {
        config.aggregation.enabled = false;
    }
    if args.no_mqtt {
        config.mqtt.enabled = false;
    }
    config.validate()?;

    info!(path = %config.storage.path.display(), "Opening database");
    let store = Store::open(&config.storage.path)
        .with_context(|| format!("opening {}", config.storage.path.display()))?;

    let (state, engine_tasks) = AppState::start(store, config.clone());

    let aggregation_task = if config.aggregation.enabled {
        let aggregator = Aggregator::new(Arc::clone(&state.store));
        Some(aggregator.spawn(config.aggregation.interval(), state.subscribe_stop()))
    } else {
        info!("Aggregation scheduler disabled");
        None
    };

    let mqtt_task = start_mqtt(&config, &state)?;

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            shutdown_state.signal_stop();
        })
        .await?;

    // Background tasks observe the stop signal; the engine and notification
    // delivery drain once the last handle is dropped.
    if let Some(task) = mqtt_task {
        let _ = task.await;
    }
    if let Some(task) = aggregation_task {
        let _ = task.await;
    }
    drop(state);
    if !engine_tasks.drain(ENGINE_DRAIN_TIMEOUT).await {
        warn!("Engine did not drain in time, exiting anyway");
    }

    info!("Service stopped");
    Ok(())
}

#[cfg(feature = "mqtt")]
fn start_mqtt(
    config: &Config,
    state: &AppState,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    if !config.mqtt.enabled {
        info!("MQTT ingestion disabled");
        return Ok(None);
    }
    let task = heatwatch_service::mqtt::spawn(
        config.mqtt.clone(),
        state.engine.clone(),
        state.subscribe_stop(),
    )
    .map_err(|e| anyhow::anyhow!("invalid MQTT configuration: {e}"))?;
    Ok(Some(task))
}

#[cfg(not(feature = "mqtt"))]
fn start_mqtt(
    config: &Config,
    _state: &AppState,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    if config.mqtt.enabled {
        warn!("MQTT ingestion requested but this build has no MQTT support");
    }
    Ok(None)
}
