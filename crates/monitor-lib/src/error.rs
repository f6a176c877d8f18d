//! Error types for the monitoring core

use thiserror::Error;

use crate::metric::Metric;
use crate::models::SensorId;

/// Errors raised while processing readings
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The reading references a sensor the registry does not know
    #[error("unknown sensor: {0}")]
    UnknownSensor(SensorId),

    /// A metric value was non-finite or outside its physical bounds
    #[error("invalid value {value} for {metric}: {reason}")]
    InvalidMetricValue {
        metric: Metric,
        value: f64,
        reason: String,
    },

    /// Two writers raced on the same open-alert key and the retry also lost
    #[error("concurrent update on open alert for sensor {sensor_id} metric {metric}")]
    ConcurrentAlertConflict { sensor_id: SensorId, metric: Metric },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by a storage collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Returned when a metric name does not match any monitored metric
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown metric: {0}")]
pub struct ParseMetricError(pub String);

/// Returned when a severity name is not one of low/medium/high/critical
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown severity: {0}")]
pub struct ParseSeverityError(pub String);

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
