//! Observability infrastructure for the monitoring pipeline
//!
//! Provides:
//! - Prometheus metrics (ingest counters, verdicts by severity, alert churn,
//!   ingest latency, latest risk score per sensor)
//! - Structured logging of pipeline events with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::anomaly::AnomalyVerdict;
use crate::models::Alert;
use crate::risk::RiskScore;
use crate::severity::Severity;

/// Histogram buckets for per-reading ingest latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    ingest_latency_seconds: Histogram,
    readings_ingested: IntCounter,
    duplicate_readings: IntCounter,
    rejected_values: IntCounter,
    unknown_sensors: IntCounter,
    verdicts: IntCounterVec,
    alerts_opened: IntCounter,
    alerts_escalated: IntCounter,
    alert_conflicts: IntCounter,
    risk_score: GaugeVec,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            ingest_latency_seconds: register_histogram!(
                "rivermon_ingest_latency_seconds",
                "Time spent processing one reading end to end",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register ingest_latency_seconds"),

            readings_ingested: register_int_counter!(
                "rivermon_readings_ingested_total",
                "Readings evaluated and stored"
            )
            .expect("Failed to register readings_ingested"),

            duplicate_readings: register_int_counter!(
                "rivermon_duplicate_readings_total",
                "Readings skipped because their (sensor, timestamp) was already stored"
            )
            .expect("Failed to register duplicate_readings"),

            rejected_values: register_int_counter!(
                "rivermon_rejected_values_total",
                "Metric values rejected as non-finite or physically impossible"
            )
            .expect("Failed to register rejected_values"),

            unknown_sensors: register_int_counter!(
                "rivermon_unknown_sensor_readings_total",
                "Readings referencing an unregistered sensor"
            )
            .expect("Failed to register unknown_sensors"),

            verdicts: register_int_counter_vec!(
                "rivermon_verdicts_total",
                "Anomaly verdicts by severity",
                &["severity"]
            )
            .expect("Failed to register verdicts"),

            alerts_opened: register_int_counter!(
                "rivermon_alerts_opened_total",
                "Alerts opened"
            )
            .expect("Failed to register alerts_opened"),

            alerts_escalated: register_int_counter!(
                "rivermon_alerts_escalated_total",
                "Open alerts raised to a higher severity"
            )
            .expect("Failed to register alerts_escalated"),

            alert_conflicts: register_int_counter!(
                "rivermon_alert_conflicts_total",
                "Alert writes that lost an optimistic concurrency race twice"
            )
            .expect("Failed to register alert_conflicts"),

            risk_score: register_gauge_vec!(
                "rivermon_risk_score",
                "Latest risk score per sensor",
                &["sensor_id"]
            )
            .expect("Failed to register risk_score"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_ingest_latency(&self, duration_secs: f64) {
        self.inner().ingest_latency_seconds.observe(duration_secs);
    }

    pub fn inc_readings_ingested(&self) {
        self.inner().readings_ingested.inc();
    }

    pub fn inc_duplicates(&self) {
        self.inner().duplicate_readings.inc();
    }

    pub fn add_rejected_values(&self, count: usize) {
        self.inner().rejected_values.inc_by(count as u64);
    }

    pub fn inc_unknown_sensor(&self) {
        self.inner().unknown_sensors.inc();
    }

    pub fn inc_verdict(&self, severity: Severity) {
        self.inner()
            .verdicts
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    pub fn inc_alerts_opened(&self) {
        self.inner().alerts_opened.inc();
    }

    pub fn inc_alerts_escalated(&self) {
        self.inner().alerts_escalated.inc();
    }

    pub fn inc_alert_conflicts(&self) {
        self.inner().alert_conflicts.inc();
    }

    pub fn set_risk_score(&self, sensor_id: &str, score: f64) {
        self.inner()
            .risk_score
            .with_label_values(&[sensor_id])
            .set(score);
    }
}

/// Structured logger for pipeline events
///
/// Every event carries an `event` field and the station name so log
/// pipelines can filter without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    station: String,
}

impl StructuredLogger {
    pub fn new(station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
        }
    }

    /// Log an anomaly verdict
    pub fn log_verdict(&self, verdict: &AnomalyVerdict) {
        match verdict.severity {
            Severity::Critical => {
                warn!(
                    event = "verdict",
                    station = %self.station,
                    sensor_id = %verdict.sensor_id,
                    metric = %verdict.metric,
                    severity = %verdict.severity,
                    value = verdict.value,
                    z_score = ?verdict.z_score,
                    "Critical water-quality anomaly"
                );
            }
            _ => {
                info!(
                    event = "verdict",
                    station = %self.station,
                    sensor_id = %verdict.sensor_id,
                    metric = %verdict.metric,
                    severity = %verdict.severity,
                    value = verdict.value,
                    z_score = ?verdict.z_score,
                    "Water-quality anomaly"
                );
            }
        }
    }

    pub fn log_alert_opened(&self, alert: &Alert) {
        info!(
            event = "alert_opened",
            station = %self.station,
            alert_id = ?alert.id.map(|id| id.0),
            sensor_id = %alert.sensor_id,
            metric = %alert.metric,
            severity = %alert.severity,
            "Alert opened"
        );
    }

    pub fn log_alert_escalated(&self, alert: &Alert, previous: Severity) {
        if alert.severity == Severity::Critical {
            warn!(
                event = "alert_escalated",
                station = %self.station,
                alert_id = ?alert.id.map(|id| id.0),
                sensor_id = %alert.sensor_id,
                metric = %alert.metric,
                previous = %previous,
                severity = %alert.severity,
                "Alert escalated"
            );
        } else {
            info!(
                event = "alert_escalated",
                station = %self.station,
                alert_id = ?alert.id.map(|id| id.0),
                sensor_id = %alert.sensor_id,
                metric = %alert.metric,
                previous = %previous,
                severity = %alert.severity,
                "Alert escalated"
            );
        }
    }

    pub fn log_alert_conflict(&self, sensor_id: &str, metric: &str) {
        warn!(
            event = "alert_conflict",
            station = %self.station,
            sensor_id = %sensor_id,
            metric = %metric,
            "Alert update lost a concurrent write twice, verdict not recorded"
        );
    }

    pub fn log_risk(&self, risk: &RiskScore) {
        info!(
            event = "risk_scored",
            station = %self.station,
            sensor_id = %risk.sensor_id,
            horizon_hours = risk.horizon_hours,
            score = risk.score,
            level = %risk.level,
            readings = risk.readings_considered,
            "Risk score updated"
        );
    }

    pub fn log_startup(&self, version: &str, sensors: usize) {
        info!(
            event = "agent_started",
            station = %self.station,
            agent_version = %version,
            sensors = sensors,
            "River monitoring agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            station = %self.station,
            reason = %reason,
            "River monitoring agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_creation() {
        let metrics = PipelineMetrics::new();

        metrics.observe_ingest_latency(0.0004);
        metrics.inc_readings_ingested();
        metrics.inc_duplicates();
        metrics.add_rejected_values(2);
        metrics.inc_verdict(Severity::High);
        metrics.inc_alerts_opened();
        metrics.set_risk_score("S1", 0.42);

        // handles share the global instance
        let other = PipelineMetrics::new();
        other.inc_readings_ingested();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("yamuna-north");
        assert_eq!(logger.station, "yamuna-north");
    }
}
