//! Per-reading anomaly detection
//!
//! Each present metric value is checked by two independent rules:
//! - absolute: the value lies outside the metric's safe range, graded by how
//!   far outside it lies relative to the range width
//! - statistical: the value deviates from the sensor's rolling baseline by
//!   more than a z-score threshold, which catches sudden jumps that are still
//!   nominally safe
//!
//! The verdict carries the higher of the two severities. Baselines are
//! updated with every evaluated value except those the absolute rule grades
//! critical, so known-bad excursions never contaminate the statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::baseline::{Baseline, DEFAULT_ALPHA};
use crate::metric::{Metric, MetricCatalog, RangeCheck};
use crate::models::{Reading, SensorId};
use crate::severity::Severity;

/// Minimum baseline samples before the statistical rule is applied
pub const MIN_BASELINE_SAMPLES: u64 = 10;

/// Detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// |z| at or above this is a medium statistical anomaly
    pub z_threshold: f64,
    /// |z| at or above this is a high statistical anomaly
    pub z_high: f64,
    pub min_baseline_samples: u64,
    /// Lower bound for the baseline standard deviation
    pub std_floor: f64,
    /// Baseline smoothing factor
    pub alpha: f64,
    /// Excess ratios (distance beyond bound / safe width) for absolute tiers
    pub medium_ratio: f64,
    pub high_ratio: f64,
    pub critical_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            z_high: 5.0,
            min_baseline_samples: MIN_BASELINE_SAMPLES,
            std_floor: 1e-3,
            alpha: DEFAULT_ALPHA,
            medium_ratio: 0.1,
            high_ratio: 0.2,
            critical_ratio: 1.5,
        }
    }
}

/// Side of the expected value the observation fell on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

/// Anomaly determination for one metric of one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub sensor_id: SensorId,
    pub metric: Metric,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Severity from the safe-range rule, if it fired
    pub absolute: Option<Severity>,
    /// Severity from the baseline rule, if it fired
    pub statistical: Option<Severity>,
    pub distance_from_safe_bound: f64,
    pub z_score: Option<f64>,
    pub baseline_mean: Option<f64>,
    pub direction: Direction,
    pub message: String,
}

/// Outcome of evaluating one metric value
#[derive(Debug, Clone)]
pub struct MetricEvaluation {
    pub verdict: Option<AnomalyVerdict>,
    /// False when the value was excluded from the baseline
    pub baseline_updated: bool,
    pub out_of_order: bool,
}

/// Outcome of evaluating a full reading
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub verdicts: Vec<AnomalyVerdict>,
    /// Metrics whose baseline absorbed the value
    pub updated: Vec<Metric>,
    /// Metrics whose value was kept out of the baseline
    pub excluded: Vec<Metric>,
}

/// Evaluates readings against safe ranges and rolling baselines
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,
    catalog: MetricCatalog,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig, catalog: MetricCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    /// Severity from the safe-range rule, `None` when inside the range
    pub fn absolute_severity(&self, metric: Metric, value: f64) -> (Option<Severity>, RangeCheck) {
        let check = self.catalog.validate(metric, value);
        if check.within_range {
            return (None, check);
        }

        let severity = if check.excess_ratio >= self.config.critical_ratio {
            Severity::Critical
        } else if check.excess_ratio >= self.config.high_ratio {
            Severity::High
        } else if check.excess_ratio >= self.config.medium_ratio {
            Severity::Medium
        } else {
            Severity::Low
        };

        (Some(severity), check)
    }

    /// Severity from the baseline rule along with the z-score, if computable
    pub fn statistical_severity(&self, value: f64, baseline: &Baseline) -> (Option<Severity>, Option<f64>) {
        if baseline.count < self.config.min_baseline_samples {
            return (None, None);
        }

        let z = baseline.z_score(value, self.config.std_floor);
        let severity = if z.abs() >= self.config.z_high {
            Some(Severity::High)
        } else if z.abs() >= self.config.z_threshold {
            Some(Severity::Medium)
        } else {
            None
        };

        (severity, Some(z))
    }

    /// Evaluate a single metric value and update its baseline in place
    pub fn evaluate_metric(
        &self,
        sensor_id: &SensorId,
        metric: Metric,
        value: f64,
        timestamp: DateTime<Utc>,
        baseline: &mut Baseline,
    ) -> MetricEvaluation {
        let (absolute, check) = self.absolute_severity(metric, value);
        let (statistical, z_score) = self.statistical_severity(value, baseline);
        let baseline_mean = (baseline.count > 0).then_some(baseline.mean);

        let verdict = absolute.max(statistical).map(|severity| {
            let direction = if check.within_range {
                if value >= baseline.mean {
                    Direction::Above
                } else {
                    Direction::Below
                }
            } else if check.above {
                Direction::Above
            } else {
                Direction::Below
            };

            let mut verdict = AnomalyVerdict {
                sensor_id: sensor_id.clone(),
                metric,
                value,
                timestamp,
                severity,
                absolute,
                statistical,
                distance_from_safe_bound: check.distance_from_safe_bound,
                z_score,
                baseline_mean,
                direction,
                message: String::new(),
            };
            verdict.message = self.describe(&verdict);
            verdict
        });

        let out_of_order = baseline.is_out_of_order(timestamp);
        if out_of_order {
            debug!(
                sensor_id = %sensor_id,
                metric = %metric,
                timestamp = %timestamp,
                last_timestamp = ?baseline.last_timestamp,
                "Out-of-order reading applied to baseline in arrival order"
            );
        }

        let baseline_updated = absolute != Some(Severity::Critical);
        if baseline_updated {
            baseline.update(value, timestamp, self.config.alpha);
        }

        MetricEvaluation {
            verdict,
            baseline_updated,
            out_of_order,
        }
    }

    /// Evaluate every present metric of a reading
    ///
    /// `baselines` holds the sensor's baselines keyed by metric; missing
    /// entries start empty. Metrics absent from the reading are left alone,
    /// as are values the catalog rejects as implausible.
    pub fn evaluate(&self, reading: &Reading, baselines: &mut BTreeMap<Metric, Baseline>) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for (&metric, &value) in &reading.values {
            if self.catalog.check_value(metric, value).is_err() {
                continue;
            }

            let baseline = baselines.entry(metric).or_default();
            let result =
                self.evaluate_metric(&reading.sensor_id, metric, value, reading.timestamp, baseline);

            if result.baseline_updated {
                evaluation.updated.push(metric);
            } else {
                evaluation.excluded.push(metric);
            }
            if let Some(verdict) = result.verdict {
                evaluation.verdicts.push(verdict);
            }
        }

        evaluation
    }

    fn describe(&self, verdict: &AnomalyVerdict) -> String {
        let spec = self.catalog.spec(verdict.metric);
        let mut parts = Vec::new();

        if verdict.absolute.is_some() {
            parts.push(format!(
                "{} {:.2} {} outside safe range [{:.2}, {:.2}]",
                verdict.metric.label(),
                verdict.value,
                spec.unit,
                spec.min_safe,
                spec.max_safe
            ));
        }
        if let (Some(_), Some(z), Some(mean)) =
            (verdict.statistical, verdict.z_score, verdict.baseline_mean)
        {
            let kind = match verdict.direction {
                Direction::Above => "spike",
                Direction::Below => "drop",
            };
            parts.push(format!(
                "{} {} to {:.2} {} (baseline {:.2}, z-score {:.1})",
                verdict.metric.label(),
                kind,
                verdict.value,
                spec.unit,
                mean,
                z
            ));
        }

        format!("{} [{}]", parts.join("; "), verdict.severity)
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default(), MetricCatalog::new())
    }
}
