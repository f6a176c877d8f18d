//! Ingestion pipeline
//!
//! Sequences Detector → Alert Manager → Risk Engine for each reading.
//! Readings of one sensor are processed one at a time under a per-sensor
//! lock; different sensors proceed concurrently.

mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::{IngestionConfig, IngestionLoop, IngestionLoopBuilder, IngestionStats};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::anomaly::{AlertManager, AnomalyDetector, AnomalyVerdict, Baseline, RecordOutcome};
use crate::config::{MonitorConfig, PipelineConfig};
use crate::error::{MonitorError, Result, StoreError};
use crate::metric::Metric;
use crate::models::{Alert, Reading, Sensor, SensorId};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::risk::{Intervention, RiskEngine, RiskScore};
use crate::store::MonitorStore;

/// A metric value dropped before evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedValue {
    pub metric: Metric,
    pub value: f64,
    pub reason: String,
}

/// Result of ingesting one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    /// The (sensor, timestamp) key was already stored; nothing changed
    pub duplicate: bool,
    pub verdicts: Vec<AnomalyVerdict>,
    /// Alerts opened, escalated or refreshed by this reading
    pub alerts: Vec<RecordOutcome>,
    pub rejected: Vec<RejectedValue>,
    pub warnings: Vec<String>,
    pub risk: Option<RiskScore>,
}

impl IngestOutcome {
    fn new(reading: &Reading) -> Self {
        Self {
            sensor_id: reading.sensor_id.clone(),
            timestamp: reading.timestamp,
            duplicate: false,
            verdicts: Vec::new(),
            alerts: Vec::new(),
            rejected: Vec::new(),
            warnings: Vec::new(),
            risk: None,
        }
    }
}

/// A reading that could not be ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

/// Result of ingesting a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<IngestOutcome>,
    pub failures: Vec<IngestFailure>,
    /// Readings repeated within the batch itself
    pub batch_duplicates: usize,
    /// Latest risk per affected sensor
    pub risks: Vec<RiskScore>,
}

impl BatchReport {
    /// Readings evaluated and stored
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.duplicate).count()
    }

    /// Readings skipped as already stored or repeated in the batch
    pub fn duplicates(&self) -> usize {
        self.outcomes.iter().filter(|o| o.duplicate).count() + self.batch_duplicates
    }

    pub fn verdict_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.verdicts.len()).sum()
    }

    pub fn alerts_opened(&self) -> usize {
        self.outcomes
            .iter()
            .flat_map(|o| o.alerts.iter())
            .filter(|a| matches!(a, RecordOutcome::Created(_)))
            .count()
    }
}

/// Work done for one sensor within a batch
struct SensorBatch {
    outcomes: Vec<IngestOutcome>,
    failures: Vec<IngestFailure>,
    risk: Option<RiskScore>,
}

/// Entry point for readings, risk queries and what-if simulation
pub struct MonitorPipeline {
    store: Arc<dyn MonitorStore>,
    detector: AnomalyDetector,
    alerts: AlertManager,
    risk: RiskEngine,
    config: PipelineConfig,
    locks: DashMap<SensorId, Arc<Mutex<()>>>,
    /// Shared by readings in flight, taken exclusively by [`quiesced`](Self::quiesced)
    gate: RwLock<()>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl MonitorPipeline {
    pub fn new(store: Arc<dyn MonitorStore>, config: &MonitorConfig) -> Self {
        let catalog = config.catalog();
        Self {
            store,
            detector: AnomalyDetector::new(config.detector.clone(), catalog.clone()),
            alerts: AlertManager::new(config.alerts.clone()),
            risk: RiskEngine::new(config.risk.clone(), catalog),
            config: config.pipeline.clone(),
            locks: DashMap::new(),
            gate: RwLock::new(()),
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("rivermon"),
        }
    }

    /// Use a logger tagged with the given station name
    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn store(&self) -> &Arc<dyn MonitorStore> {
        &self.store
    }

    pub fn risk_engine(&self) -> &RiskEngine {
        &self.risk
    }

    /// Run `f` while no reading is part-way through processing
    ///
    /// Store snapshots taken inside `f` never hold a baseline update without
    /// the reading that caused it.
    pub async fn quiesced<R>(&self, f: impl FnOnce() -> R) -> R {
        let _gate = self.gate.write().await;
        f()
    }

    /// Ingest a single reading
    ///
    /// Fails with [`MonitorError::UnknownSensor`] for unregistered sensors
    /// and with [`MonitorError::Store`] when storage fails. Invalid metric
    /// values and lost alert races are reported in the outcome instead.
    pub async fn ingest(&self, reading: Reading) -> Result<IngestOutcome> {
        let start = Instant::now();
        let sensor = self.sensor(&reading.sensor_id).await?;

        let mut outcome = self.process(reading).await?;
        if !outcome.duplicate && self.config.recompute_risk_on_ingest {
            outcome.risk = Some(
                self.compute_risk(&sensor.id, self.risk.config().default_horizon_hours)
                    .await?,
            );
        }

        self.metrics
            .observe_ingest_latency(start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Ingest many readings
    ///
    /// Readings are grouped by sensor and applied in timestamp order (stable
    /// for equal timestamps, first copy wins). Sensors are processed
    /// concurrently. A failing reading does not stop the batch.
    pub async fn ingest_batch(&self, readings: Vec<Reading>) -> BatchReport {
        let mut groups: BTreeMap<SensorId, Vec<Reading>> = BTreeMap::new();
        for reading in readings {
            groups
                .entry(reading.sensor_id.clone())
                .or_default()
                .push(reading);
        }

        let mut report = BatchReport::default();
        for group in groups.values_mut() {
            group.sort_by_key(|r| r.timestamp);
            let before = group.len();
            group.dedup_by_key(|r| r.timestamp);
            report.batch_duplicates += before - group.len();
        }

        let results = join_all(
            groups
                .into_iter()
                .map(|(sensor_id, readings)| self.ingest_sensor(sensor_id, readings)),
        )
        .await;

        for batch in results {
            report.outcomes.extend(batch.outcomes);
            report.failures.extend(batch.failures);
            report.risks.extend(batch.risk);
        }

        debug!(
            accepted = report.accepted(),
            duplicates = report.duplicates(),
            failures = report.failures.len(),
            "Batch ingested"
        );
        report
    }

    /// Current risk of a sensor from stored readings and open alerts
    pub async fn compute_risk(&self, sensor_id: &SensorId, horizon_hours: u32) -> Result<RiskScore> {
        let (readings, alerts) = self.risk_inputs(sensor_id).await?;
        let risk = self.risk.score(sensor_id, &readings, &alerts, horizon_hours);

        self.metrics.set_risk_score(sensor_id.as_str(), risk.score);
        self.logger.log_risk(&risk);
        Ok(risk)
    }

    /// Counterfactual risk after applying `intervention`
    ///
    /// Reads the same inputs as [`compute_risk`](Self::compute_risk) and
    /// writes nothing.
    pub async fn simulate_risk(
        &self,
        sensor_id: &SensorId,
        horizon_hours: u32,
        intervention: &Intervention,
    ) -> Result<RiskScore> {
        let (readings, alerts) = self.risk_inputs(sensor_id).await?;
        debug!(
            sensor_id = %sensor_id,
            intervention = %intervention,
            "Simulating intervention"
        );
        Ok(self
            .risk
            .simulate(sensor_id, &readings, &alerts, horizon_hours, intervention))
    }

    async fn risk_inputs(
        &self,
        sensor_id: &SensorId,
    ) -> Result<(Vec<Reading>, Vec<Alert>)> {
        self.sensor(sensor_id).await?;
        let readings = self
            .store
            .get_recent_readings(sensor_id, self.risk.config().window_readings)
            .await?;
        let alerts = self.store.open_alerts(sensor_id).await?;
        Ok((readings, alerts))
    }

    async fn ingest_sensor(&self, sensor_id: SensorId, readings: Vec<Reading>) -> SensorBatch {
        let mut batch = SensorBatch {
            outcomes: Vec::with_capacity(readings.len()),
            failures: Vec::new(),
            risk: None,
        };

        let failure = |reading: &Reading, error: &MonitorError| IngestFailure {
            sensor_id: reading.sensor_id.clone(),
            timestamp: reading.timestamp,
            error: error.to_string(),
        };

        if let Err(e) = self.sensor(&sensor_id).await {
            batch.failures = readings.iter().map(|r| failure(r, &e)).collect();
            return batch;
        }

        for reading in readings {
            let start = Instant::now();
            match self.process(reading.clone()).await {
                Ok(outcome) => batch.outcomes.push(outcome),
                Err(e) => {
                    warn!(
                        sensor_id = %reading.sensor_id,
                        timestamp = %reading.timestamp,
                        error = %e,
                        "Failed to ingest reading"
                    );
                    batch.failures.push(failure(&reading, &e));
                }
            }
            self.metrics
                .observe_ingest_latency(start.elapsed().as_secs_f64());
        }

        let changed = batch.outcomes.iter().any(|o| !o.duplicate);
        if changed && self.config.recompute_risk_on_ingest {
            match self
                .compute_risk(&sensor_id, self.risk.config().default_horizon_hours)
                .await
            {
                Ok(risk) => batch.risk = Some(risk),
                Err(e) => warn!(sensor_id = %sensor_id, error = %e, "Failed to compute risk"),
            }
        }

        batch
    }

    /// Detector and Alert Manager steps for one reading, under the sensor lock
    async fn process(&self, reading: Reading) -> Result<IngestOutcome> {
        let _pass = self.gate.read().await;
        let lock = self.sensor_lock(&reading.sensor_id);
        let _guard = lock.lock().await;

        let mut outcome = IngestOutcome::new(&reading);
        let sensor_id = reading.sensor_id.clone();

        if self.store.has_reading(&sensor_id, reading.timestamp).await? {
            debug!(
                sensor_id = %sensor_id,
                timestamp = %reading.timestamp,
                "Duplicate reading ignored"
            );
            self.metrics.inc_duplicates();
            outcome.duplicate = true;
            return Ok(outcome);
        }

        let mut reading = self.accept_values(reading, &mut outcome);

        let mut baselines = BTreeMap::new();
        for &metric in reading.values.keys() {
            let baseline = self
                .store
                .get_baseline(&sensor_id, metric)
                .await?
                .unwrap_or_else(Baseline::new);
            baselines.insert(metric, baseline);
        }

        let evaluation = self.detector.evaluate(&reading, &mut baselines);

        // Alerts go first: until the reading is appended a retry re-evaluates it
        for verdict in evaluation.verdicts {
            self.metrics.inc_verdict(verdict.severity);
            self.logger.log_verdict(&verdict);

            match self.alerts.record(&*self.store, &verdict).await {
                Ok(RecordOutcome::Suppressed) => {}
                Ok(recorded) => {
                    match &recorded {
                        RecordOutcome::Created(alert) => {
                            self.metrics.inc_alerts_opened();
                            self.logger.log_alert_opened(alert);
                        }
                        RecordOutcome::Escalated { alert, previous } => {
                            self.metrics.inc_alerts_escalated();
                            self.logger.log_alert_escalated(alert, *previous);
                        }
                        _ => {}
                    }
                    outcome.alerts.push(recorded);
                }
                Err(e @ MonitorError::ConcurrentAlertConflict { .. }) => {
                    self.metrics.inc_alert_conflicts();
                    self.logger
                        .log_alert_conflict(verdict.sensor_id.as_str(), verdict.metric.as_str());
                    outcome.warnings.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
            outcome.verdicts.push(verdict);
        }

        for metric in &evaluation.updated {
            if let Some(baseline) = baselines.get(metric) {
                self.store.save_baseline(&sensor_id, *metric, baseline).await?;
            }
        }
        reading.deviated = outcome.verdicts.iter().any(|v| v.statistical.is_some());
        self.store.append_reading(&reading).await?;
        self.metrics.inc_readings_ingested();

        Ok(outcome)
    }

    /// Drop values that cannot be real measurements, recording why
    fn accept_values(&self, mut reading: Reading, outcome: &mut IngestOutcome) -> Reading {
        let catalog = self.detector.catalog();
        reading.values.retain(|&metric, &mut value| {
            match catalog.check_value(metric, value) {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        sensor_id = %outcome.sensor_id,
                        metric = %metric,
                        value = value,
                        error = %e,
                        "Rejected metric value"
                    );
                    let reason = match e {
                        MonitorError::InvalidMetricValue { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    outcome.rejected.push(RejectedValue {
                        metric,
                        value,
                        reason,
                    });
                    false
                }
            }
        });

        if !outcome.rejected.is_empty() {
            self.metrics.add_rejected_values(outcome.rejected.len());
        }
        reading
    }

    async fn sensor(&self, sensor_id: &SensorId) -> Result<Sensor> {
        match self.store.get_sensor(sensor_id).await {
            Ok(sensor) => Ok(sensor),
            Err(StoreError::NotFound(_)) => {
                self.metrics.inc_unknown_sensor();
                Err(MonitorError::UnknownSensor(sensor_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn sensor_lock(&self, sensor_id: &SensorId) -> Arc<Mutex<()>> {
        self.locks
            .entry(sensor_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
