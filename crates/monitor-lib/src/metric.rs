//! Monitored water-quality metrics and their safe ranges
//!
//! The catalog is pure data: it answers "is this value inside the safe
//! range, and if not, by how much" and "is this value physically plausible
//! at all". It holds no per-sensor state.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, ParseMetricError};

/// The fixed set of monitored metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[serde(alias = "pH", alias = "PH")]
    Ph,
    #[serde(alias = "do", alias = "DO", alias = "do2", alias = "DO2")]
    DissolvedOxygen,
    #[serde(alias = "BOD")]
    Bod,
    #[serde(alias = "COD")]
    Cod,
    Turbidity,
    Ammonia,
    Temperature,
    Conductivity,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Ph,
        Metric::DissolvedOxygen,
        Metric::Bod,
        Metric::Cod,
        Metric::Turbidity,
        Metric::Ammonia,
        Metric::Temperature,
        Metric::Conductivity,
    ];

    /// Canonical snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Ph => "ph",
            Metric::DissolvedOxygen => "dissolved_oxygen",
            Metric::Bod => "bod",
            Metric::Cod => "cod",
            Metric::Turbidity => "turbidity",
            Metric::Ammonia => "ammonia",
            Metric::Temperature => "temperature",
            Metric::Conductivity => "conductivity",
        }
    }

    /// Short label used in alert messages and tables
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Ph => "pH",
            Metric::DissolvedOxygen => "DO",
            Metric::Bod => "BOD",
            Metric::Cod => "COD",
            Metric::Turbidity => "Turbidity",
            Metric::Ammonia => "Ammonia",
            Metric::Temperature => "Temperature",
            Metric::Conductivity => "Conductivity",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ph" => Ok(Metric::Ph),
            "dissolved_oxygen" | "do" | "do2" | "oxygen" => Ok(Metric::DissolvedOxygen),
            "bod" => Ok(Metric::Bod),
            "cod" => Ok(Metric::Cod),
            "turbidity" => Ok(Metric::Turbidity),
            "ammonia" | "nh3" => Ok(Metric::Ammonia),
            "temperature" | "temp" => Ok(Metric::Temperature),
            "conductivity" | "ec" => Ok(Metric::Conductivity),
            _ => Err(ParseMetricError(s.to_string())),
        }
    }
}

/// Which direction of movement makes water quality worse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdverseDirection {
    /// Higher values are worse (pollutant load)
    Rising,
    /// Lower values are worse (dissolved oxygen)
    Falling,
    /// Moving away from the reference value either way is worse
    Either,
}

/// Static description of one metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub metric: Metric,
    pub unit: &'static str,
    pub min_safe: f64,
    pub max_safe: f64,
    /// Values outside these bounds are sensor faults, not water conditions
    pub min_valid: f64,
    pub max_valid: f64,
    pub adverse: AdverseDirection,
    /// Neutral value for the pollution index
    pub reference: f64,
    /// Contribution per unit of adverse excursion to the pollution index
    pub index_weight: f64,
}

impl MetricSpec {
    /// Width of the safe range, never zero
    pub fn safe_width(&self) -> f64 {
        (self.max_safe - self.min_safe).max(f64::EPSILON)
    }

    /// Adverse excursion from the reference value, weighted for the pollution index
    pub fn index_contribution(&self, value: f64) -> f64 {
        let excursion = match self.adverse {
            AdverseDirection::Rising => (value - self.reference).max(0.0),
            AdverseDirection::Falling => (self.reference - value).max(0.0),
            AdverseDirection::Either => (value - self.reference).abs(),
        };
        excursion * self.index_weight
    }
}

/// Result of checking a value against a metric's safe range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeCheck {
    pub within_range: bool,
    /// Distance beyond the nearest violated bound (0 when inside)
    pub distance_from_safe_bound: f64,
    /// `distance_from_safe_bound` expressed in multiples of the safe width
    pub excess_ratio: f64,
    /// True when the value is above `max_safe`
    pub above: bool,
}

/// Partial override of a metric's safe range from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeRangeOverride {
    pub min_safe: Option<f64>,
    pub max_safe: Option<f64>,
}

/// Registry of all monitored metrics
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    specs: Vec<MetricSpec>,
}

impl MetricCatalog {
    /// Catalog with the default river water-quality ranges
    pub fn new() -> Self {
        let specs = Metric::ALL.iter().map(|m| default_spec(*m)).collect();
        Self { specs }
    }

    /// Default catalog with per-metric safe range overrides applied
    pub fn with_overrides(overrides: &HashMap<Metric, SafeRangeOverride>) -> Self {
        let mut catalog = Self::new();
        for (metric, o) in overrides {
            let spec = &mut catalog.specs[metric.index()];
            if let Some(min) = o.min_safe {
                spec.min_safe = min;
            }
            if let Some(max) = o.max_safe {
                spec.max_safe = max;
            }
        }
        catalog
    }

    pub fn spec(&self, metric: Metric) -> &MetricSpec {
        &self.specs[metric.index()]
    }

    pub fn specs(&self) -> impl Iterator<Item = &MetricSpec> {
        self.specs.iter()
    }

    /// Check a value against the metric's safe range
    pub fn validate(&self, metric: Metric, value: f64) -> RangeCheck {
        let spec = self.spec(metric);
        let (distance, above) = if value > spec.max_safe {
            (value - spec.max_safe, true)
        } else if value < spec.min_safe {
            (spec.min_safe - value, false)
        } else {
            (0.0, false)
        };

        RangeCheck {
            within_range: distance == 0.0,
            distance_from_safe_bound: distance,
            excess_ratio: distance / spec.safe_width(),
            above,
        }
    }

    /// Reject values that cannot be real measurements
    pub fn check_value(&self, metric: Metric, value: f64) -> Result<f64, MonitorError> {
        if !value.is_finite() {
            return Err(MonitorError::InvalidMetricValue {
                metric,
                value,
                reason: "value is not a finite number".to_string(),
            });
        }

        let spec = self.spec(metric);
        if value < spec.min_valid || value > spec.max_valid {
            return Err(MonitorError::InvalidMetricValue {
                metric,
                value,
                reason: format!(
                    "outside physical bounds [{}, {}] {}",
                    spec.min_valid, spec.max_valid, spec.unit
                ),
            });
        }

        Ok(value)
    }

    /// Pollution index of a set of metric values (higher is worse)
    pub fn pollution_index<'a>(&self, values: impl IntoIterator<Item = (&'a Metric, &'a f64)>) -> f64 {
        values
            .into_iter()
            .map(|(m, v)| self.spec(*m).index_contribution(*v))
            .sum()
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn default_spec(metric: Metric) -> MetricSpec {
    use AdverseDirection::*;

    // (unit, min_safe, max_safe, min_valid, max_valid, adverse, reference, index_weight)
    let (unit, min_safe, max_safe, min_valid, max_valid, adverse, reference, index_weight) =
        match metric {
            Metric::Ph => ("pH", 6.5, 8.5, 0.0, 14.0, Either, 7.0, 1.0),
            Metric::DissolvedOxygen => ("mg/L", 5.0, 14.0, 0.0, 25.0, Falling, 8.0, 1.5),
            Metric::Bod => ("mg/L", 0.0, 3.0, 0.0, 1_000.0, Rising, 0.0, 0.2),
            Metric::Cod => ("mg/L", 0.0, 20.0, 0.0, 5_000.0, Rising, 0.0, 0.1),
            Metric::Turbidity => ("NTU", 0.0, 10.0, 0.0, 4_000.0, Rising, 0.0, 0.05),
            Metric::Ammonia => ("mg/L", 0.0, 1.2, 0.0, 500.0, Rising, 0.0, 0.2),
            Metric::Temperature => ("°C", 5.0, 35.0, -5.0, 60.0, Either, 20.0, 0.0),
            Metric::Conductivity => ("µS/cm", 0.0, 1_500.0, 0.0, 100_000.0, Rising, 0.0, 0.01),
        };

    MetricSpec {
        metric,
        unit,
        min_safe,
        max_safe,
        min_valid,
        max_valid,
        adverse,
        reference,
        index_weight,
    }
}
