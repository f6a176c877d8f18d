//! Batching ingestion loop
//!
//! Receives readings over a channel and hands them to the pipeline in
//! batches, flushing when a batch is full or the flush interval elapses.

use super::{BatchReport, MonitorPipeline};
use crate::health::{Component, HealthRegistry};
use crate::models::Reading;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the ingestion loop
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Readings per batch before an early flush (default: 256)
    pub max_batch: usize,
    /// Maximum time a reading waits in a partial batch (default: 1 second)
    pub flush_interval: Duration,
    /// Channel buffer size for incoming readings
    pub buffer_size: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_batch: 256,
            flush_interval: Duration::from_secs(1),
            buffer_size: 1024,
        }
    }
}

/// Totals over the lifetime of a loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionStats {
    pub batches: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub failures: u64,
    pub alerts_opened: u64,
}

impl IngestionStats {
    fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.accepted += report.accepted() as u64;
        self.duplicates += report.duplicates() as u64;
        self.failures += report.failures.len() as u64;
        self.alerts_opened += report.alerts_opened() as u64;
    }
}

/// Loop feeding channel readings into the pipeline
pub struct IngestionLoop {
    pipeline: Arc<MonitorPipeline>,
    health: Option<HealthRegistry>,
    config: IngestionConfig,
    readings_rx: mpsc::Receiver<Reading>,
    pending: Vec<Reading>,
    stats: IngestionStats,
}

impl IngestionLoop {
    /// Create a new loop and the sender that feeds it
    pub fn new(
        pipeline: Arc<MonitorPipeline>,
        config: IngestionConfig,
    ) -> (Self, mpsc::Sender<Reading>) {
        let (readings_tx, readings_rx) = mpsc::channel(config.buffer_size.max(1));

        let loop_instance = Self {
            pipeline,
            health: None,
            pending: Vec::with_capacity(config.max_batch),
            config,
            readings_rx,
            stats: IngestionStats::default(),
        };

        (loop_instance, readings_tx)
    }

    /// Report batch health to a registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until shutdown or until every sender is dropped
    ///
    /// Readings already queued when shutdown arrives are still ingested.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> IngestionStats {
        info!(
            max_batch = self.config.max_batch,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            "Starting ingestion loop"
        );

        let mut ticker = interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.readings_rx.recv() => {
                    match received {
                        Some(reading) => {
                            self.pending.push(reading);
                            if self.pending.len() >= self.config.max_batch {
                                self.flush().await;
                            }
                        }
                        None => {
                            debug!("All reading senders closed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        self.flush().await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down ingestion loop, draining queued readings");
                    while let Ok(reading) = self.readings_rx.try_recv() {
                        self.pending.push(reading);
                    }
                    break;
                }
            }
        }

        while !self.pending.is_empty() {
            self.flush().await;
        }

        info!(
            batches = self.stats.batches,
            accepted = self.stats.accepted,
            duplicates = self.stats.duplicates,
            failures = self.stats.failures,
            "Ingestion loop stopped"
        );
        self.stats
    }

    async fn flush(&mut self) {
        let take = self.pending.len().min(self.config.max_batch.max(1));
        let batch: Vec<Reading> = self.pending.drain(..take).collect();
        let size = batch.len();

        let start = Instant::now();
        let report = self.pipeline.ingest_batch(batch).await;
        let elapsed = start.elapsed();

        self.stats.absorb(&report);
        debug!(
            readings = size,
            accepted = report.accepted(),
            failures = report.failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Flushed reading batch"
        );

        let Some(health) = &self.health else { return };
        health.record_batch(report.accepted(), Utc::now()).await;

        if report.failures.is_empty() {
            health.set_healthy(Component::Ingestion).await;
        } else {
            warn!(
                failures = report.failures.len(),
                readings = size,
                "Some readings in batch failed"
            );
            health
                .set_degraded(
                    Component::Ingestion,
                    format!("{} of {} readings failed in last batch", report.failures.len(), size),
                )
                .await;
        }

        if elapsed > self.config.flush_interval {
            health
                .set_degraded(
                    Component::RiskEngine,
                    format!("batch took {} ms", elapsed.as_millis()),
                )
                .await;
        } else {
            health.set_healthy(Component::RiskEngine).await;
        }
    }
}

/// Builder for creating the ingestion loop
pub struct IngestionLoopBuilder {
    pipeline: Option<Arc<MonitorPipeline>>,
    health: Option<HealthRegistry>,
    config: IngestionConfig,
}

impl IngestionLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            pipeline: None,
            health: None,
            config: IngestionConfig::default(),
        }
    }

    pub fn pipeline(mut self, pipeline: Arc<MonitorPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn max_batch(mut self, max_batch: usize) -> Self {
        self.config.max_batch = max_batch;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Build the loop and the sender that feeds it
    pub fn build(self) -> Result<(IngestionLoop, mpsc::Sender<Reading>)> {
        let pipeline = self
            .pipeline
            .ok_or_else(|| anyhow::anyhow!("Pipeline is required"))?;
        anyhow::ensure!(self.config.max_batch > 0, "max_batch must be positive");
        anyhow::ensure!(
            !self.config.flush_interval.is_zero(),
            "flush_interval must be positive"
        );

        let (ingestion_loop, tx) = IngestionLoop::new(pipeline, self.config);
        let ingestion_loop = match self.health {
            Some(health) => ingestion_loop.with_health(health),
            None => ingestion_loop,
        };
        Ok((ingestion_loop, tx))
    }
}

impl Default for IngestionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
