//! Hourly pollution-index projection
//!
//! Readings are collapsed into a pollution index, averaged per clock hour and
//! extrapolated with a straight line over the hour index.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::trend::linear_fit;
use crate::metric::MetricCatalog;
use crate::models::Reading;

const SECS_PER_HOUR: i64 = 3600;

/// Projected pollution index for one future hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// Start of the projected hour
    pub at: DateTime<Utc>,
    pub pollution_index: f64,
}

/// Project the pollution index for each of the next `horizon_hours` hours
pub fn project(catalog: &MetricCatalog, readings: &[Reading], horizon_hours: u32) -> Vec<ForecastPoint> {
    let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for reading in readings {
        let hour = reading.timestamp.timestamp().div_euclid(SECS_PER_HOUR);
        let index = catalog.pollution_index(reading.values.iter());
        let entry = buckets.entry(hour).or_insert((0.0, 0));
        entry.0 += index;
        entry.1 += 1;
    }

    let Some((&last_hour, &(last_sum, last_count))) = buckets.iter().next_back() else {
        return Vec::new();
    };
    let last_mean = last_sum / last_count as f64;

    let first_hour = buckets.keys().next().copied().unwrap_or(last_hour);
    let hourly: Vec<(f64, f64)> = buckets
        .iter()
        .map(|(hour, (sum, count))| ((hour - first_hour) as f64, sum / *count as f64))
        .collect();
    let fit = (hourly.len() >= 2).then(|| linear_fit(&hourly));

    (1..=horizon_hours as i64)
        .filter_map(|step| {
            let hour = last_hour + step;
            let at = DateTime::<Utc>::from_timestamp(hour * SECS_PER_HOUR, 0)?;
            let value = match &fit {
                Some(fit) => fit.at((hour - first_hour) as f64).max(0.0),
                None => last_mean,
            };
            Some(ForecastPoint {
                at,
                pollution_index: value,
            })
        })
        .collect()
}

/// Current hour's mean index, used as the starting point of a forecast
pub fn latest_index(catalog: &MetricCatalog, readings: &[Reading]) -> Option<f64> {
    let last = readings.last()?;
    let hour_start = last.timestamp - Duration::seconds(last.timestamp.timestamp().rem_euclid(SECS_PER_HOUR));
    let values: Vec<f64> = readings
        .iter()
        .filter(|r| r.timestamp >= hour_start)
        .map(|r| catalog.pollution_index(r.values.iter()))
        .collect();
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Metric;
    use chrono::TimeZone;

    fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn bod(hour: u32, minute: u32, value: f64) -> Reading {
        Reading::new("S1", ts(hour, minute)).with_value(Metric::Bod, value)
    }

    #[test]
    fn test_empty_window_has_no_forecast() {
        assert!(project(&MetricCatalog::new(), &[], 6).is_empty());
    }

    #[test]
    fn test_single_bucket_repeats_last_value() {
        let catalog = MetricCatalog::new();
        let readings = vec![bod(8, 0, 4.0), bod(8, 30, 6.0)];
        let forecast = project(&catalog, &readings, 3);

        assert_eq!(forecast.len(), 3);
        assert_eq!(forecast[0].at, ts(9, 0));
        let expected = catalog.pollution_index(readings[0].values.iter()) / 2.0
            + catalog.pollution_index(readings[1].values.iter()) / 2.0;
        assert!(forecast.iter().all(|p| (p.pollution_index - expected).abs() < 1e-9));
    }

    #[test]
    fn test_linear_projection_over_hours() {
        let catalog = MetricCatalog::new();
        let readings = vec![bod(6, 0, 2.0), bod(7, 0, 4.0), bod(8, 0, 6.0)];
        let forecast = project(&catalog, &readings, 2);

        let step = catalog.pollution_index(readings[1].values.iter())
            - catalog.pollution_index(readings[0].values.iter());
        let last = catalog.pollution_index(readings[2].values.iter());
        assert!((forecast[0].pollution_index - (last + step)).abs() < 1e-9);
        assert!((forecast[1].pollution_index - (last + 2.0 * step)).abs() < 1e-9);
    }

    #[test]
    fn test_improving_trend_floors_at_zero() {
        let catalog = MetricCatalog::new();
        let readings = vec![bod(6, 0, 6.0), bod(7, 0, 3.0), bod(8, 0, 0.0)];
        let forecast = project(&catalog, &readings, 4);
        assert!(forecast.iter().all(|p| p.pollution_index == 0.0));
    }

    #[test]
    fn test_latest_index_uses_current_hour() {
        let catalog = MetricCatalog::new();
        let readings = vec![bod(6, 10, 9.0), bod(7, 5, 2.0), bod(7, 40, 4.0)];
        let latest = latest_index(&catalog, &readings).unwrap();
        let expected = (catalog.pollution_index(readings[1].values.iter())
            + catalog.pollution_index(readings[2].values.iter()))
            / 2.0;
        assert!((latest - expected).abs() < 1e-9);
    }
}
