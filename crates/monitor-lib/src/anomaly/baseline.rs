//! Per-sensor, per-metric rolling baseline
//!
//! Keeps an exponentially weighted mean and variance in constant space.
//! Each update uses weight `max(alpha, 1/n)`, which makes the first `1/alpha`
//! samples an exact cumulative mean/variance (Welford-style warm-up) and
//! every later sample an exponentially weighted update, so slow drift is
//! followed without unbounded history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default smoothing factor (~50 sample effective window)
pub const DEFAULT_ALPHA: f64 = 0.02;

/// Rolling statistical summary of one metric on one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Number of samples folded into the summary
    pub count: u64,
    pub mean: f64,
    /// Population variance of the (weighted) samples
    pub variance: f64,
    /// Timestamp of the most recently applied sample
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl Baseline {
    /// Empty baseline
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            variance: 0.0,
            last_timestamp: None,
        }
    }

    /// Baseline with known statistics, e.g. seeded from historical data
    pub fn from_stats(count: u64, mean: f64, std_dev: f64) -> Self {
        Self {
            count,
            mean,
            variance: std_dev * std_dev,
            last_timestamp: None,
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    /// Fold one sample into the summary
    ///
    /// Samples are applied in call order. A timestamp older than
    /// `last_timestamp` is still applied; the summary does not reorder.
    pub fn update(&mut self, value: f64, timestamp: DateTime<Utc>, alpha: f64) {
        self.count += 1;
        let weight = alpha.clamp(f64::EPSILON, 1.0).max(1.0 / self.count as f64);

        let diff = value - self.mean;
        let increment = weight * diff;
        self.mean += increment;
        self.variance = (1.0 - weight) * (self.variance + diff * increment);

        self.last_timestamp = Some(match self.last_timestamp {
            Some(prev) if prev > timestamp => prev,
            _ => timestamp,
        });
    }

    /// Whether `timestamp` is older than the newest sample already applied
    pub fn is_out_of_order(&self, timestamp: DateTime<Utc>) -> bool {
        self.last_timestamp.map(|last| timestamp < last).unwrap_or(false)
    }

    /// Signed number of standard deviations between `value` and the mean
    pub fn z_score(&self, value: f64, std_floor: f64) -> f64 {
        (value - self.mean) / self.std_dev().max(std_floor)
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self::new()
    }
}
