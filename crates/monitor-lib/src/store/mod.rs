//! Storage and sensor registry interface
//!
//! The pipeline never touches persistence directly: baselines, alerts and
//! readings flow through [`MonitorStore`]. [`MemoryStore`] is the bundled
//! implementation used by the agent, the CLI and the tests.

mod memory;

pub use memory::{MemoryStore, DEFAULT_READING_RETENTION};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::anomaly::Baseline;
use crate::error::StoreError;
use crate::metric::Metric;
use crate::models::{Alert, Reading, Sensor, SensorId};

/// Trait for storage/registry collaborators
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Look up a registered sensor; `StoreError::NotFound` if unknown
    async fn get_sensor(&self, sensor_id: &SensorId) -> Result<Sensor, StoreError>;

    async fn get_baseline(
        &self,
        sensor_id: &SensorId,
        metric: Metric,
    ) -> Result<Option<Baseline>, StoreError>;

    async fn save_baseline(
        &self,
        sensor_id: &SensorId,
        metric: Metric,
        baseline: &Baseline,
    ) -> Result<(), StoreError>;

    /// The unresolved alert for a (sensor, metric) pair, if any
    async fn find_open_alert(
        &self,
        sensor_id: &SensorId,
        metric: Metric,
    ) -> Result<Option<Alert>, StoreError>;

    /// Insert (`id == None`) or update an alert
    ///
    /// Implementations must return `StoreError::Conflict` when inserting a
    /// second open alert for the same key, or when the stored `version`
    /// differs from the one on the alert being written. The returned alert
    /// carries the assigned id and new version.
    async fn upsert_alert(&self, alert: Alert) -> Result<Alert, StoreError>;

    /// All unresolved alerts of one sensor
    async fn open_alerts(&self, sensor_id: &SensorId) -> Result<Vec<Alert>, StoreError>;

    /// Up to `limit` most recent readings, oldest first
    async fn get_recent_readings(
        &self,
        sensor_id: &SensorId,
        limit: usize,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Whether a reading with this (sensor, timestamp) key was already stored
    async fn has_reading(
        &self,
        sensor_id: &SensorId,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Append a reading; an existing reading with the same key is kept
    async fn append_reading(&self, reading: &Reading) -> Result<(), StoreError>;
}
