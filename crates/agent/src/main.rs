//! River monitoring agent
//!
//! Runs next to a monitoring station: streams NDJSON readings into the
//! pipeline, keeps a snapshot of the store on disk, and serves health and
//! metrics endpoints.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use monitor_lib::{
    health::{Component, HealthRegistry},
    observability::{PipelineMetrics, StructuredLogger},
    pipeline::IngestionLoopBuilder,
    MemoryStore, MonitorConfig, MonitorPipeline,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod source;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting rivermon-agent");

    let config = config::AgentConfig::load()?;
    info!(station = %config.station_name, "Agent configured");

    let monitor_config = MonitorConfig::load(config.config_path.as_deref())?;

    let store = Arc::new(match &config.state_path {
        Some(path) => MemoryStore::load(path)
            .with_context(|| format!("Failed to load snapshot {}", path.display()))?,
        None => MemoryStore::new(),
    });
    if let Some(path) = &config.sensors_path {
        for sensor in source::load_sensors(path)? {
            store.register_sensor(sensor);
        }
    }

    let health_registry = HealthRegistry::with_pipeline_components().await;
    let metrics = PipelineMetrics::new();

    let logger = StructuredLogger::new(&config.station_name);
    logger.log_startup(AGENT_VERSION, store.sensors().len());

    let pipeline = Arc::new(
        MonitorPipeline::new(store.clone(), &monitor_config).with_logger(logger.clone()),
    );

    let (ingestion_loop, readings_tx) = IngestionLoopBuilder::new()
        .pipeline(pipeline.clone())
        .health(health_registry.clone())
        .max_batch(config.batch_size)
        .flush_interval(config.flush_interval())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(4);
    let ingestion_handle = tokio::spawn(ingestion_loop.run(shutdown_tx.subscribe()));

    if let Some(path) = config.readings_path.clone() {
        let shutdown = shutdown_tx.subscribe();
        let health = health_registry.clone();
        tokio::spawn(async move {
            if let Err(e) = source::stream_readings(path, readings_tx, shutdown).await {
                error!(error = %e, "Reading source failed");
                health
                    .set_unhealthy(Component::Ingestion, e.to_string())
                    .await;
            }
        });
    } else {
        warn!("No readings source configured (AGENT_READINGS_PATH), serving health only");
        drop(readings_tx);
    }

    if let Some(path) = config.state_path.clone() {
        tokio::spawn(snapshot_loop(
            store.clone(),
            pipeline.clone(),
            path,
            config.snapshot_interval(),
            health_registry.clone(),
            shutdown_tx.subscribe(),
        ));
    }

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        store.clone(),
        &config.station_name,
    ));

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    match ingestion_handle.await {
        Ok(stats) => info!(
            batches = stats.batches,
            accepted = stats.accepted,
            alerts_opened = stats.alerts_opened,
            "Ingestion drained"
        ),
        Err(e) => error!(error = %e, "Ingestion task failed"),
    }

    if let Some(path) = &config.state_path {
        pipeline
            .quiesced(|| store.save(path))
            .await
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        info!(path = %path.display(), "Final snapshot written");
    }

    api_handle.abort();
    Ok(())
}

/// Periodically persist the store between readings
async fn snapshot_loop(
    store: Arc<MemoryStore>,
    pipeline: Arc<MonitorPipeline>,
    path: std::path::PathBuf,
    every: std::time::Duration,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                write_snapshot(&store, &pipeline, &path, &health).await;
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn write_snapshot(
    store: &MemoryStore,
    pipeline: &MonitorPipeline,
    path: &Path,
    health: &HealthRegistry,
) {
    match pipeline.quiesced(|| store.save(path)).await {
        Ok(()) => health.set_healthy(Component::Store).await,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Snapshot write failed");
            health
                .set_degraded(Component::Store, format!("snapshot write failed: {e}"))
                .await;
        }
    }
}
