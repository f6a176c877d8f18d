//! Hypothetical interventions for what-if scoring

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metric::{Metric, MetricCatalog};
use crate::models::Reading;

/// Metrics a pollutant-load reduction policy acts on
pub const POLLUTANT_METRICS: [Metric; 5] = [
    Metric::Bod,
    Metric::Cod,
    Metric::Turbidity,
    Metric::Ammonia,
    Metric::Conductivity,
];

/// Change applied to every value of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    /// Scale values down by this percentage (negative raises them)
    ReducePercent(f64),
    /// Add a constant in the metric's unit
    Offset(f64),
}

impl Adjustment {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Adjustment::ReducePercent(pct) => value * (1.0 - pct / 100.0).max(0.0),
            Adjustment::Offset(delta) => value + delta,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Adjustment::ReducePercent(pct) => *pct == 0.0,
            Adjustment::Offset(delta) => *delta == 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricAdjustment {
    pub metric: Metric,
    pub adjustment: Adjustment,
}

impl fmt::Display for MetricAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.adjustment {
            Adjustment::ReducePercent(pct) => write!(f, "{} -{}%", self.metric, pct),
            Adjustment::Offset(delta) => write!(f, "{} {:+}", self.metric, delta),
        }
    }
}

/// Set of adjustments applied together to a copy of the readings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub adjustments: Vec<MetricAdjustment>,
}

impl Intervention {
    /// Intervention that changes nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Reduce every pollutant-load metric by `percent`
    pub fn pollutant_reduction(percent: f64) -> Self {
        let mut intervention = Self::none();
        for metric in POLLUTANT_METRICS {
            intervention = intervention.reduce(metric, percent);
        }
        intervention
    }

    pub fn reduce(mut self, metric: Metric, percent: f64) -> Self {
        self.adjustments.push(MetricAdjustment {
            metric,
            adjustment: Adjustment::ReducePercent(percent),
        });
        self
    }

    pub fn offset(mut self, metric: Metric, delta: f64) -> Self {
        self.adjustments.push(MetricAdjustment {
            metric,
            adjustment: Adjustment::Offset(delta),
        });
        self
    }

    pub fn is_noop(&self) -> bool {
        self.adjustments.iter().all(|a| a.adjustment.is_zero())
    }

    /// Adjusted copies of `readings`; absent values stay absent
    ///
    /// Adjustments for the same metric compose in list order and the result
    /// is clamped to the metric's plausible range. A reading whose values
    /// changed loses its `deviated` mark and is judged on its ranges alone.
    pub fn apply(&self, readings: &[Reading], catalog: &MetricCatalog) -> Vec<Reading> {
        readings
            .iter()
            .map(|reading| {
                let mut adjusted = reading.clone();
                for adj in &self.adjustments {
                    if let Some(value) = adjusted.values.get_mut(&adj.metric) {
                        let spec = catalog.spec(adj.metric);
                        *value = adj
                            .adjustment
                            .apply(*value)
                            .clamp(spec.min_valid, spec.max_valid);
                    }
                }
                if adjusted.values != reading.values {
                    adjusted.deviated = false;
                }
                adjusted
            })
            .collect()
    }
}

impl fmt::Display for Intervention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.adjustments.is_empty() {
            return write!(f, "none");
        }
        let parts: Vec<String> = self.adjustments.iter().map(|a| a.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn catalog() -> MetricCatalog {
        MetricCatalog::new()
    }

    fn reading() -> Reading {
        Reading::new("S1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .with_value(Metric::Ammonia, 2.0)
            .with_value(Metric::Ph, 7.4)
    }

    #[test]
    fn test_reduce_percent() {
        let adjusted = Intervention::none().reduce(Metric::Ammonia, 25.0).apply(&[reading()], &catalog());
        assert!((adjusted[0].value(Metric::Ammonia).unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(adjusted[0].value(Metric::Ph), Some(7.4));
    }

    #[test]
    fn test_reduction_never_goes_negative() {
        let adjusted = Intervention::none().reduce(Metric::Ammonia, 150.0).apply(&[reading()], &catalog());
        assert_eq!(adjusted[0].value(Metric::Ammonia), Some(0.0));
    }

    #[test]
    fn test_absent_values_stay_absent() {
        let adjusted = Intervention::none().offset(Metric::Bod, 1.0).apply(&[reading()], &catalog());
        assert_eq!(adjusted[0].value(Metric::Bod), None);
    }

    #[test]
    fn test_offset_clamped_to_plausible_range() {
        let adjusted = Intervention::none()
            .offset(Metric::Ammonia, -5.0)
            .offset(Metric::Ph, 20.0)
            .apply(&[reading()], &catalog());
        assert_eq!(adjusted[0].value(Metric::Ammonia), Some(0.0));
        assert_eq!(
            adjusted[0].value(Metric::Ph),
            Some(catalog().spec(Metric::Ph).max_valid)
        );
    }

    #[test]
    fn test_changed_reading_drops_deviation_mark() {
        let mut marked = reading();
        marked.deviated = true;

        let untouched = Intervention::none()
            .reduce(Metric::Bod, 30.0)
            .apply(&[marked.clone()], &catalog());
        assert!(untouched[0].deviated);

        let reduced = Intervention::pollutant_reduction(30.0).apply(&[marked], &catalog());
        assert!(!reduced[0].deviated);
    }

    #[test]
    fn test_pollutant_reduction_skips_ph() {
        let intervention = Intervention::pollutant_reduction(10.0);
        assert_eq!(intervention.adjustments.len(), POLLUTANT_METRICS.len());
        assert!(intervention.adjustments.iter().all(|a| a.metric != Metric::Ph));
        assert!(!intervention.is_noop());
        assert!(Intervention::pollutant_reduction(0.0).is_noop());
    }

    #[test]
    fn test_source_readings_untouched() {
        let original = vec![reading()];
        let _ = Intervention::pollutant_reduction(50.0).apply(&original, &catalog());
        assert_eq!(original[0].value(Metric::Ammonia), Some(2.0));
    }
}
