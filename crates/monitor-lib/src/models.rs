//! Core data models for the monitoring pipeline

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::metric::Metric;
use crate::severity::Severity;

/// Sensor identifier
///
/// Accepts either a JSON string or an integer on input and always
/// serializes as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SensorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'de> Deserialize<'de> for SensorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(i64),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(s) => SensorId(s),
            Repr::Number(n) => SensorId(n.to_string()),
        })
    }
}

/// A monitoring station registered with the sensor registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "type", default = "default_sensor_type")]
    pub sensor_type: String,
    #[serde(default)]
    pub last_service: Option<DateTime<Utc>>,
}

fn default_sensor_type() -> String {
    "water".to_string()
}

impl Sensor {
    pub fn new(id: impl Into<SensorId>, name: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lat,
            lon,
            sensor_type: default_sensor_type(),
            last_service: None,
        }
    }
}

/// One timestamped set of metric values from a sensor
///
/// Only reported metrics are present in `values`; a missing metric is
/// never the same thing as a zero reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<Metric, f64>,
    /// Set at ingest when the baseline rule flagged any of the values
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deviated: bool,
}

impl Reading {
    pub fn new(sensor_id: impl Into<SensorId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp,
            values: BTreeMap::new(),
            deviated: false,
        }
    }

    /// Builder-style setter for a metric value
    pub fn with_value(mut self, metric: Metric, value: f64) -> Self {
        self.values.insert(metric, value);
        self
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    /// Deduplication key
    pub fn key(&self) -> (SensorId, DateTime<Utc>) {
        (self.sensor_id.clone(), self.timestamp)
    }
}

/// Reading as submitted by ingestion sources (wire format)
///
/// One optional field per metric; field names of the legacy API
/// (`pH`, `DO2`, `BOD`, ...) are accepted as aliases. Use
/// [`RawReading::into_reading`] to obtain the domain [`Reading`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub sensor_id: Option<SensorId>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "pH", alias = "PH")]
    pub ph: Option<f64>,
    #[serde(default, alias = "DO", alias = "DO2", alias = "do2")]
    pub dissolved_oxygen: Option<f64>,
    #[serde(default, alias = "BOD")]
    pub bod: Option<f64>,
    #[serde(default, alias = "COD")]
    pub cod: Option<f64>,
    #[serde(default)]
    pub turbidity: Option<f64>,
    #[serde(default)]
    pub ammonia: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub conductivity: Option<f64>,
}

impl RawReading {
    /// Convert into a domain reading, stamping `now` when no timestamp was sent
    ///
    /// Returns `None` when the payload carries no sensor id.
    pub fn into_reading(self, now: DateTime<Utc>) -> Option<Reading> {
        let sensor_id = self.sensor_id?;
        let timestamp = self.timestamp.unwrap_or(now);

        let values = [
            (Metric::Ph, self.ph),
            (Metric::DissolvedOxygen, self.dissolved_oxygen),
            (Metric::Bod, self.bod),
            (Metric::Cod, self.cod),
            (Metric::Turbidity, self.turbidity),
            (Metric::Ammonia, self.ammonia),
            (Metric::Temperature, self.temperature),
            (Metric::Conductivity, self.conductivity),
        ]
        .into_iter()
        .filter_map(|(metric, value)| value.map(|v| (metric, v)))
        .collect();

        Some(Reading {
            sensor_id,
            timestamp,
            values,
            deviated: false,
        })
    }
}

/// Accepts RFC 3339 timestamps and offset-less ones (taken as UTC)
fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&raw, fmt).ok())
        .map(|naive| Some(naive.and_utc()))
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Store-assigned alert identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tracked abnormal condition on one (sensor, metric) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `None` until the store persists the alert
    pub id: Option<AlertId>,
    pub sensor_id: SensorId,
    pub metric: Metric,
    pub severity: Severity,
    pub message: String,
    /// When the condition was first detected; kept across escalations
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub occurrences: u32,
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by the store on every write
    #[serde(default)]
    pub version: u64,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        !self.resolved
    }
}
