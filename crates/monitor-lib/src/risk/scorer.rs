//! Risk score computation
//!
//! score = clamp(w_anomaly * anomaly_fraction
//!             + w_alerts * alert_pressure
//!             + w_trend * trend, 0, 1)

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::forecast::{self, ForecastPoint};
use super::simulation::Intervention;
use super::trend::{self, TrendEstimate};
use crate::metric::{Metric, MetricCatalog};
use crate::models::{Alert, Reading, SensorId};
use crate::severity::Severity;

/// Risk engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Newest readings considered
    pub window_readings: usize,
    /// Readings older than this relative to the newest one are ignored
    pub window_hours: u32,
    pub anomaly_weight: f64,
    pub alert_weight: f64,
    pub trend_weight: f64,
    /// Weighted open-alert total that saturates the alert component
    pub alert_saturation: f64,
    pub min_trend_points: usize,
    pub rolling_window: usize,
    pub default_horizon_hours: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            window_readings: 100,
            window_hours: 24,
            anomaly_weight: 0.4,
            alert_weight: 0.35,
            trend_weight: 0.25,
            alert_saturation: 16.0,
            min_trend_points: 3,
            rolling_window: 3,
            default_horizon_hours: 24,
        }
    }
}

/// Normalised score components, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskComponents {
    pub anomaly_fraction: f64,
    pub alert_pressure: f64,
    pub trend: f64,
}

/// Something that pushed the score up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskFactor {
    AnomalousReadings {
        fraction: f64,
        contribution: f64,
    },
    OutOfRange {
        metric: Metric,
        readings: usize,
    },
    OpenAlerts {
        count: usize,
        weighted: f64,
        contribution: f64,
    },
    Trend {
        metric: Metric,
        slope_per_hour: f64,
        contribution: f64,
    },
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskFactor::AnomalousReadings {
                fraction,
                contribution,
            } => write!(
                f,
                "{:.0}% of readings out of range (+{:.3})",
                fraction * 100.0,
                contribution
            ),
            RiskFactor::OutOfRange { metric, readings } => {
                write!(f, "{} out of range in {} reading(s)", metric.label(), readings)
            }
            RiskFactor::OpenAlerts {
                count,
                weighted,
                contribution,
            } => write!(
                f,
                "{} open alert(s), weight {} (+{:.3})",
                count, weighted, contribution
            ),
            RiskFactor::Trend {
                metric,
                slope_per_hour,
                contribution,
            } => write!(
                f,
                "{} trending {:+.4}/h (+{:.3})",
                metric.label(),
                slope_per_hour,
                contribution
            ),
        }
    }
}

/// Short-horizon pollution risk of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub sensor_id: SensorId,
    pub horizon_hours: u32,
    /// In [0, 1]
    pub score: f64,
    pub level: Severity,
    /// Timestamp of the newest reading scored
    pub as_of: Option<DateTime<Utc>>,
    pub readings_considered: usize,
    pub components: RiskComponents,
    pub trend: Option<TrendEstimate>,
    pub factors: Vec<RiskFactor>,
    /// Pollution index of the newest hour of data
    pub pollution_index: Option<f64>,
    pub forecast: Vec<ForecastPoint>,
}

/// Band a score into a severity for display and alerting
pub fn risk_level(score: f64) -> Severity {
    if score >= 0.75 {
        Severity::Critical
    } else if score >= 0.5 {
        Severity::High
    } else if score >= 0.25 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Stateless scorer over readings and alerts handed to it
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: RiskConfig,
    catalog: MetricCatalog,
}

impl RiskEngine {
    pub fn new(config: RiskConfig, catalog: MetricCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Score a sensor from its recent readings and alerts
    ///
    /// Only open alerts of `sensor_id` count. Readings need not be sorted.
    pub fn score(
        &self,
        sensor_id: &SensorId,
        readings: &[Reading],
        alerts: &[Alert],
        horizon_hours: u32,
    ) -> RiskScore {
        let window = self.window(readings);

        let mut out_of_range: BTreeMap<Metric, usize> = BTreeMap::new();
        let mut anomalous = 0usize;
        for reading in &window {
            let mut any = false;
            for (metric, value) in &reading.values {
                if !self.catalog.validate(*metric, *value).within_range {
                    *out_of_range.entry(*metric).or_insert(0) += 1;
                    any = true;
                }
            }
            if any || reading.deviated {
                anomalous += 1;
            }
        }
        let anomaly_fraction = if window.is_empty() {
            0.0
        } else {
            anomalous as f64 / window.len() as f64
        };

        let open: Vec<&Alert> = alerts
            .iter()
            .filter(|a| a.is_open() && &a.sensor_id == sensor_id)
            .collect();
        let weighted: f64 = open.iter().map(|a| a.severity.weight()).sum();
        let alert_pressure = if self.config.alert_saturation > 0.0 {
            (weighted / self.config.alert_saturation).clamp(0.0, 1.0)
        } else if weighted > 0.0 {
            1.0
        } else {
            0.0
        };

        let trend = trend::estimate(
            &self.catalog,
            &window,
            horizon_hours,
            self.config.min_trend_points,
            self.config.rolling_window,
        );
        let trend_component = trend
            .as_ref()
            .map(|t| t.adverse_change.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        let components = RiskComponents {
            anomaly_fraction,
            alert_pressure,
            trend: trend_component,
        };
        let weighted_anomaly = self.config.anomaly_weight * anomaly_fraction;
        let weighted_alerts = self.config.alert_weight * alert_pressure;
        let weighted_trend = self.config.trend_weight * trend_component;
        let score = (weighted_anomaly + weighted_alerts + weighted_trend).clamp(0.0, 1.0);

        let mut factors = Vec::new();
        if anomaly_fraction > 0.0 {
            factors.push(RiskFactor::AnomalousReadings {
                fraction: anomaly_fraction,
                contribution: weighted_anomaly,
            });
            factors.extend(
                out_of_range
                    .into_iter()
                    .map(|(metric, readings)| RiskFactor::OutOfRange { metric, readings }),
            );
        }
        if alert_pressure > 0.0 {
            factors.push(RiskFactor::OpenAlerts {
                count: open.len(),
                weighted,
                contribution: weighted_alerts,
            });
        }
        if let Some(t) = trend.as_ref().filter(|_| trend_component > 0.0) {
            factors.push(RiskFactor::Trend {
                metric: t.metric,
                slope_per_hour: t.slope_per_hour,
                contribution: weighted_trend,
            });
        }

        debug!(
            sensor_id = %sensor_id,
            readings = window.len(),
            anomaly_fraction,
            alert_pressure,
            trend = trend_component,
            score,
            "Computed risk score"
        );

        RiskScore {
            sensor_id: sensor_id.clone(),
            horizon_hours,
            score,
            level: risk_level(score),
            as_of: window.last().map(|r| r.timestamp),
            readings_considered: window.len(),
            components,
            trend,
            factors,
            pollution_index: forecast::latest_index(&self.catalog, &window),
            forecast: forecast::project(&self.catalog, &window, horizon_hours),
        }
    }

    /// Score after applying `intervention` to copies of the readings
    ///
    /// Alerts are taken as they are; the store is never touched.
    pub fn simulate(
        &self,
        sensor_id: &SensorId,
        readings: &[Reading],
        alerts: &[Alert],
        horizon_hours: u32,
        intervention: &Intervention,
    ) -> RiskScore {
        let adjusted = intervention.apply(readings, &self.catalog);
        self.score(sensor_id, &adjusted, alerts, horizon_hours)
    }

    /// Chronological window bounded by count and by age of the newest reading
    fn window(&self, readings: &[Reading]) -> Vec<Reading> {
        let mut sorted: Vec<Reading> = readings.to_vec();
        sorted.sort_by_key(|r| r.timestamp);

        let skip = sorted.len().saturating_sub(self.config.window_readings);
        let mut window: Vec<Reading> = sorted.into_iter().skip(skip).collect();

        if let Some(newest) = window.last().map(|r| r.timestamp) {
            let cutoff = newest - Duration::hours(self.config.window_hours as i64);
            window.retain(|r| r.timestamp >= cutoff);
        }
        window
    }
}
