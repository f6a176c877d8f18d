//! Anomaly detection for water-quality readings
//!
//! This module provides:
//! - Rolling per-metric baselines (exponentially weighted mean/variance)
//! - Absolute (safe-range) and statistical (z-score) detection
//! - Alert lifecycle: deduplication, escalation and suppression

mod alerter;
mod baseline;
mod detector;

pub use alerter::{AlertConfig, AlertManager, RecordOutcome};
pub use baseline::{Baseline, DEFAULT_ALPHA};
pub use detector::{
    AnomalyDetector, AnomalyVerdict, DetectorConfig, Direction, Evaluation, MetricEvaluation,
    MIN_BASELINE_SAMPLES,
};
