//! Short-horizon trend of the most volatile metric
//!
//! Picks the metric whose values vary the most relative to its safe width,
//! smooths it with a trailing rolling mean and fits a least-squares line
//! against elapsed hours. The slope is then projected over the horizon and
//! expressed in safe widths, positive when the movement is adverse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metric::{AdverseDirection, Metric, MetricCatalog};
use crate::models::Reading;

/// Trend of one metric over the scoring window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEstimate {
    pub metric: Metric,
    /// Standard deviation divided by the safe width
    pub volatility: f64,
    /// Slope of the rolling mean, in metric units per hour
    pub slope_per_hour: f64,
    /// Projected change over the horizon in safe widths; positive is adverse
    pub adverse_change: f64,
    /// Goodness of fit of the regression line
    pub r_squared: f64,
    pub points: usize,
}

/// Trend over `readings` (chronological) for a horizon of `horizon_hours`
///
/// Returns `None` when no metric has at least `min_points` values.
pub fn estimate(
    catalog: &MetricCatalog,
    readings: &[Reading],
    horizon_hours: u32,
    min_points: usize,
    rolling_window: usize,
) -> Option<TrendEstimate> {
    let t0 = readings.first()?.timestamp;

    let (metric, series, volatility) = most_volatile(catalog, readings, min_points.max(2))?;
    let spec = catalog.spec(metric);

    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let smoothed = rolling_mean(&values, rolling_window);
    let samples: Vec<(f64, f64)> = series
        .iter()
        .zip(smoothed.iter())
        .map(|((ts, _), mean)| (hours_between(t0, *ts), *mean))
        .collect();

    let fit = linear_fit(&samples);
    let projected = fit.slope * horizon_hours as f64 / spec.safe_width();

    let adverse_sign = match spec.adverse {
        AdverseDirection::Rising => 1.0,
        AdverseDirection::Falling => -1.0,
        AdverseDirection::Either => {
            let latest = smoothed.last().copied().unwrap_or(spec.reference);
            if latest >= spec.reference {
                1.0
            } else {
                -1.0
            }
        }
    };

    Some(TrendEstimate {
        metric,
        volatility,
        slope_per_hour: fit.slope,
        adverse_change: projected * adverse_sign,
        r_squared: fit.r_squared,
        points: samples.len(),
    })
}

fn most_volatile(
    catalog: &MetricCatalog,
    readings: &[Reading],
    min_points: usize,
) -> Option<(Metric, Vec<(DateTime<Utc>, f64)>, f64)> {
    let mut best: Option<(Metric, Vec<(DateTime<Utc>, f64)>, f64)> = None;

    for metric in Metric::ALL {
        let series: Vec<(DateTime<Utc>, f64)> = readings
            .iter()
            .filter_map(|r| r.value(metric).map(|v| (r.timestamp, v)))
            .collect();
        if series.len() < min_points {
            continue;
        }

        let volatility = std_dev(series.iter().map(|(_, v)| *v)) / catalog.spec(metric).safe_width();
        let better = match &best {
            Some((_, _, current)) => volatility > *current,
            None => true,
        };
        if better {
            best = Some((metric, series, volatility));
        }
    }

    best
}

/// Trailing rolling mean; the first points average what is available
pub(crate) fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n;
    (values.map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

pub(crate) fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 3600.0
}

/// Least-squares line through (x, y) samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

pub(crate) fn linear_fit(samples: &[(f64, f64)]) -> LinearFit {
    let n = samples.len() as f64;
    if samples.is_empty() {
        return LinearFit {
            slope: 0.0,
            intercept: 0.0,
            r_squared: 0.0,
        };
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for (x, y) in samples {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let mean_x = sum_x / n;
    let mean_y = sum_y / n;

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return LinearFit {
            slope: 0.0,
            intercept: mean_y,
            r_squared: 0.0,
        };
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (x, y) in samples {
        ss_res += (y - (slope * x + intercept)).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }

    let r_squared = if ss_tot.abs() < f64::EPSILON {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    };

    LinearFit {
        slope,
        intercept,
        r_squared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    #[test]
    fn test_linear_fit_perfect_line() {
        let samples: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        let fit = linear_fit(&samples);
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 1.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
        assert!((fit.at(20.0) - 41.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_fit_single_x_is_flat() {
        let fit = linear_fit(&[(1.0, 3.0), (1.0, 5.0)]);
        assert_eq!(fit.slope, 0.0);
        assert!((fit.intercept - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_mean_trailing() {
        let means = rolling_mean(&[3.0, 6.0, 9.0, 12.0], 3);
        assert_eq!(means, vec![3.0, 4.5, 6.0, 9.0]);
    }

    #[test]
    fn test_rising_ammonia_is_adverse() {
        let catalog = MetricCatalog::new();
        let readings: Vec<Reading> = (0..6)
            .map(|h| {
                Reading::new("S1", ts(h))
                    .with_value(Metric::Ammonia, 0.2 + 0.1 * h as f64)
                    .with_value(Metric::Ph, 7.2)
            })
            .collect();

        let trend = estimate(&catalog, &readings, 6, 3, 3).unwrap();
        assert_eq!(trend.metric, Metric::Ammonia);
        assert!(trend.slope_per_hour > 0.0);
        assert!(trend.adverse_change > 0.0);
    }

    #[test]
    fn test_rising_oxygen_is_favourable() {
        let catalog = MetricCatalog::new();
        let readings: Vec<Reading> = (0..6)
            .map(|h| Reading::new("S1", ts(h)).with_value(Metric::DissolvedOxygen, 5.0 + h as f64))
            .collect();

        let trend = estimate(&catalog, &readings, 6, 3, 3).unwrap();
        assert_eq!(trend.metric, Metric::DissolvedOxygen);
        assert!(trend.adverse_change < 0.0);
    }

    #[test]
    fn test_too_few_points() {
        let catalog = MetricCatalog::new();
        let readings = vec![
            Reading::new("S1", ts(0)).with_value(Metric::Ph, 7.0),
            Reading::new("S1", ts(1)).with_value(Metric::Ph, 7.5),
        ];
        assert!(estimate(&catalog, &readings, 6, 3, 3).is_none());
    }
}
