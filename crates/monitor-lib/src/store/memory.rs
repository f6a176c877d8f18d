//! In-memory store with JSON snapshot persistence
//!
//! Concurrent maps keyed by sensor (and metric) so that writers on different
//! sensors never contend. Snapshots are written to a temporary file and
//! renamed into place.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::MonitorStore;
use crate::anomaly::Baseline;
use crate::error::StoreError;
use crate::metric::Metric;
use crate::models::{Alert, AlertId, Reading, Sensor, SensorId};

/// Readings kept per sensor before the oldest are evicted
pub const DEFAULT_READING_RETENTION: usize = 10_000;

type MetricKey = (SensorId, Metric);

/// Thread-safe in-memory implementation of [`MonitorStore`]
pub struct MemoryStore {
    sensors: DashMap<SensorId, Sensor>,
    baselines: DashMap<MetricKey, Baseline>,
    alerts: DashMap<AlertId, Alert>,
    /// (sensor, metric) -> id of the open alert
    open_index: DashMap<MetricKey, AlertId>,
    readings: DashMap<SensorId, BTreeMap<DateTime<Utc>, Reading>>,
    /// Newest timestamp evicted per sensor; anything at or before it counts as seen
    evicted_through: DashMap<SensorId, DateTime<Utc>>,
    next_alert_id: AtomicU64,
    retention: usize,
}

/// On-disk layout of a snapshot
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    sensors: Vec<Sensor>,
    baselines: Vec<BaselineEntry>,
    alerts: Vec<Alert>,
    readings: Vec<Reading>,
    #[serde(default)]
    evicted_through: Vec<EvictionMark>,
    next_alert_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct EvictionMark {
    sensor_id: SensorId,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselineEntry {
    sensor_id: SensorId,
    metric: Metric,
    baseline: Baseline,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_READING_RETENTION)
    }

    /// Store that keeps at most `retention` readings per sensor
    pub fn with_retention(retention: usize) -> Self {
        Self {
            sensors: DashMap::new(),
            baselines: DashMap::new(),
            alerts: DashMap::new(),
            open_index: DashMap::new(),
            readings: DashMap::new(),
            evicted_through: DashMap::new(),
            next_alert_id: AtomicU64::new(1),
            retention: retention.max(1),
        }
    }

    /// Register or replace a sensor
    pub fn register_sensor(&self, sensor: Sensor) {
        debug!(sensor_id = %sensor.id, "Registering sensor");
        self.sensors.insert(sensor.id.clone(), sensor);
    }

    /// All registered sensors ordered by id
    pub fn sensors(&self) -> Vec<Sensor> {
        let mut sensors: Vec<Sensor> = self.sensors.iter().map(|r| r.value().clone()).collect();
        sensors.sort_by(|a, b| a.id.cmp(&b.id));
        sensors
    }

    /// Record a maintenance visit; the only mutable sensor attribute
    pub fn record_service(&self, sensor_id: &SensorId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut sensor = self
            .sensors
            .get_mut(sensor_id)
            .ok_or_else(|| StoreError::NotFound(format!("sensor {sensor_id}")))?;
        sensor.last_service = Some(at);
        Ok(())
    }

    /// Operator action: mark an alert resolved
    pub fn resolve_alert(&self, id: AlertId, at: DateTime<Utc>) -> Result<Alert, StoreError> {
        let (alert, newly_resolved) = {
            let mut alert = self
                .alerts
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(format!("alert {id}")))?;
            let newly_resolved = !alert.resolved;
            if newly_resolved {
                alert.resolved = true;
                alert.resolved_at = Some(at);
                alert.version += 1;
            }
            (alert.clone(), newly_resolved)
        };

        // The alerts guard is released first; inserts lock open_index before alerts
        if newly_resolved {
            self.open_index
                .remove_if(&(alert.sensor_id.clone(), alert.metric), |_, open| *open == id);
        }
        Ok(alert)
    }

    /// All alerts, newest first
    pub fn alerts(&self, unresolved_only: bool) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|r| !unresolved_only || r.is_open())
            .map(|r| r.value().clone())
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        alerts
    }

    pub fn reading_count(&self, sensor_id: &SensorId) -> usize {
        self.readings.get(sensor_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Load a snapshot, or start empty when the file does not exist
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let store = Self::new();
        if !path.exists() {
            info!(path = %path.display(), "No snapshot found, starting with an empty store");
            return Ok(store);
        }

        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        for sensor in snapshot.sensors {
            store.sensors.insert(sensor.id.clone(), sensor);
        }
        for entry in snapshot.baselines {
            store
                .baselines
                .insert((entry.sensor_id, entry.metric), entry.baseline);
        }
        for alert in snapshot.alerts {
            let Some(id) = alert.id else { continue };
            if alert.is_open() {
                store.open_index.insert((alert.sensor_id.clone(), alert.metric), id);
            }
            store.alerts.insert(id, alert);
        }
        for mark in snapshot.evicted_through {
            store.evicted_through.insert(mark.sensor_id, mark.timestamp);
        }
        for reading in snapshot.readings {
            store.insert_reading(reading);
        }

        let max_id = store.alerts.iter().map(|r| r.key().0).max().unwrap_or(0);
        store
            .next_alert_id
            .store(snapshot.next_alert_id.max(max_id + 1), Ordering::SeqCst);

        info!(
            path = %path.display(),
            sensors = store.sensors.len(),
            alerts = store.alerts.len(),
            "Loaded store snapshot"
        );
        Ok(store)
    }

    /// Write a snapshot atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            sensors: self.sensors(),
            baselines: self
                .baselines
                .iter()
                .map(|r| BaselineEntry {
                    sensor_id: r.key().0.clone(),
                    metric: r.key().1,
                    baseline: r.value().clone(),
                })
                .collect(),
            alerts: self.alerts(false),
            readings: self
                .readings
                .iter()
                .flat_map(|r| r.value().values().cloned().collect::<Vec<_>>())
                .collect(),
            evicted_through: self
                .evicted_through
                .iter()
                .map(|r| EvictionMark {
                    sensor_id: r.key().clone(),
                    timestamp: *r.value(),
                })
                .collect(),
            next_alert_id: self.next_alert_id.load(Ordering::SeqCst),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;

        debug!(path = %path.display(), "Saved store snapshot");
        Ok(())
    }

    fn insert_reading(&self, reading: Reading) {
        let sensor_id = reading.sensor_id.clone();
        let mut series = self.readings.entry(sensor_id.clone()).or_default();
        series.entry(reading.timestamp).or_insert(reading);

        let mut evicted = None;
        while series.len() > self.retention {
            evicted = series.pop_first().map(|(timestamp, _)| timestamp);
        }
        drop(series);

        if let Some(timestamp) = evicted {
            self.evicted_through
                .entry(sensor_id)
                .and_modify(|mark| *mark = (*mark).max(timestamp))
                .or_insert(timestamp);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn get_sensor(&self, sensor_id: &SensorId) -> Result<Sensor, StoreError> {
        self.sensors
            .get(sensor_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("sensor {sensor_id}")))
    }

    async fn get_baseline(
        &self,
        sensor_id: &SensorId,
        metric: Metric,
    ) -> Result<Option<Baseline>, StoreError> {
        Ok(self
            .baselines
            .get(&(sensor_id.clone(), metric))
            .map(|r| r.value().clone()))
    }

    async fn save_baseline(
        &self,
        sensor_id: &SensorId,
        metric: Metric,
        baseline: &Baseline,
    ) -> Result<(), StoreError> {
        self.baselines
            .insert((sensor_id.clone(), metric), baseline.clone());
        Ok(())
    }

    async fn find_open_alert(
        &self,
        sensor_id: &SensorId,
        metric: Metric,
    ) -> Result<Option<Alert>, StoreError> {
        let Some(id) = self.open_index.get(&(sensor_id.clone(), metric)).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self
            .alerts
            .get(&id)
            .filter(|a| a.is_open())
            .map(|a| a.value().clone()))
    }

    async fn upsert_alert(&self, mut alert: Alert) -> Result<Alert, StoreError> {
        let key = (alert.sensor_id.clone(), alert.metric);

        let Some(id) = alert.id else {
            if alert.resolved {
                return Err(StoreError::Backend(
                    "cannot insert an alert that is already resolved".to_string(),
                ));
            }
            return match self.open_index.entry(key) {
                Entry::Occupied(open) => Err(StoreError::Conflict(format!(
                    "alert {} is already open for sensor {} metric {}",
                    open.get(),
                    alert.sensor_id,
                    alert.metric
                ))),
                Entry::Vacant(slot) => {
                    let id = AlertId(self.next_alert_id.fetch_add(1, Ordering::SeqCst));
                    alert.id = Some(id);
                    alert.version = 1;
                    self.alerts.insert(id, alert.clone());
                    slot.insert(id);
                    Ok(alert)
                }
            };
        };

        let mut stored = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("alert {id}")))?;

        if stored.version != alert.version {
            return Err(StoreError::Conflict(format!(
                "alert {id} changed (stored version {}, written version {})",
                stored.version, alert.version
            )));
        }

        alert.version += 1;
        *stored = alert.clone();
        drop(stored);

        if alert.resolved {
            self.open_index.remove_if(&key, |_, open| *open == id);
        }
        Ok(alert)
    }

    async fn open_alerts(&self, sensor_id: &SensorId) -> Result<Vec<Alert>, StoreError> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|r| r.is_open() && &r.sensor_id == sensor_id)
            .map(|r| r.value().clone())
            .collect();
        alerts.sort_by_key(|a| a.metric);
        Ok(alerts)
    }

    async fn get_recent_readings(
        &self,
        sensor_id: &SensorId,
        limit: usize,
    ) -> Result<Vec<Reading>, StoreError> {
        let Some(series) = self.readings.get(sensor_id) else {
            return Ok(Vec::new());
        };
        let skip = series.len().saturating_sub(limit);
        Ok(series.values().skip(skip).cloned().collect())
    }

    async fn has_reading(
        &self,
        sensor_id: &SensorId,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if let Some(mark) = self.evicted_through.get(sensor_id) {
            if timestamp <= *mark {
                return Ok(true);
            }
        }
        Ok(self
            .readings
            .get(sensor_id)
            .map(|series| series.contains_key(&timestamp))
            .unwrap_or(false))
    }

    async fn append_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        self.insert_reading(reading.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn new_alert(metric: Metric) -> Alert {
        Alert {
            id: None,
            sensor_id: SensorId::new("S1"),
            metric,
            severity: Severity::Medium,
            message: "test".to_string(),
            created_at: ts(0),
            last_seen_at: ts(0),
            occurrences: 1,
            resolved: false,
            resolved_at: None,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_unknown_sensor_not_found() {
        let store = MemoryStore::new();
        let result = store.get_sensor(&SensorId::new("nope")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_second_open_alert_conflicts() {
        let store = MemoryStore::new();
        let first = store.upsert_alert(new_alert(Metric::Ph)).await.unwrap();
        assert_eq!(first.version, 1);

        let second = store.upsert_alert(new_alert(Metric::Ph)).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));

        // different metric is a different key
        assert!(store.upsert_alert(new_alert(Metric::Bod)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        let saved = store.upsert_alert(new_alert(Metric::Ph)).await.unwrap();

        let mut update = saved.clone();
        update.severity = Severity::High;
        let updated = store.upsert_alert(update).await.unwrap();
        assert_eq!(updated.version, 2);

        let mut stale = saved;
        stale.severity = Severity::Critical;
        assert!(matches!(
            store.upsert_alert(stale).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_clears_open_index() {
        let store = MemoryStore::new();
        let saved = store.upsert_alert(new_alert(Metric::Ph)).await.unwrap();
        let sensor = SensorId::new("S1");

        store.resolve_alert(saved.id.unwrap(), ts(3)).unwrap();

        assert!(store.find_open_alert(&sensor, Metric::Ph).await.unwrap().is_none());
        assert!(store.open_alerts(&sensor).await.unwrap().is_empty());
        assert_eq!(store.alerts(false).len(), 1);
        assert!(store.alerts(true).is_empty());
    }

    #[tokio::test]
    async fn test_recent_readings_are_chronological_and_limited() {
        let store = MemoryStore::with_retention(5);
        for minute in [4, 0, 2, 1, 3, 6, 5] {
            store
                .append_reading(&Reading::new("S1", ts(minute)).with_value(Metric::Ph, 7.0))
                .await
                .unwrap();
        }
        let sensor = SensorId::new("S1");

        assert_eq!(store.reading_count(&sensor), 5);
        let recent = store.get_recent_readings(&sensor, 3).await.unwrap();
        let minutes: Vec<DateTime<Utc>> = recent.iter().map(|r| r.timestamp).collect();
        assert_eq!(minutes, vec![ts(4), ts(5), ts(6)]);
        assert!(store.has_reading(&sensor, ts(6)).await.unwrap());
        assert!(!store.has_reading(&sensor, ts(7)).await.unwrap());
    }

    #[tokio::test]
    async fn test_evicted_readings_still_count_as_seen() {
        let store = MemoryStore::with_retention(2);
        let sensor = SensorId::new("S1");
        for minute in [0, 1, 2] {
            store
                .append_reading(&Reading::new("S1", ts(minute)).with_value(Metric::Ph, 7.0))
                .await
                .unwrap();
        }

        assert_eq!(store.reading_count(&sensor), 2);
        assert!(store.has_reading(&sensor, ts(0)).await.unwrap());
        // older than anything retained, never stored
        assert!(store.has_reading(&sensor, ts(-30)).await.unwrap());
        assert!(!store.has_reading(&sensor, ts(3)).await.unwrap());
        assert!(!store.has_reading(&SensorId::new("S2"), ts(0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_eviction_mark_survives_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::with_retention(1);
        for minute in [0, 1] {
            store
                .append_reading(&Reading::new("S1", ts(minute)).with_value(Metric::Ph, 7.0))
                .await
                .unwrap();
        }
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert!(loaded.has_reading(&SensorId::new("S1"), ts(0)).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_resolve_races_with_inserts() {
        let store = Arc::new(MemoryStore::new());

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    if let Ok(alert) = store.upsert_alert(new_alert(Metric::Ph)).await {
                        assert!(alert.id.is_some());
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        let resolver = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    for alert in store.alerts(true) {
                        let _ = store.resolve_alert(alert.id.unwrap(), ts(1));
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let finished = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            writer.await.unwrap();
            resolver.await.unwrap();
        })
        .await;
        assert!(finished.is_ok(), "resolve and insert deadlocked");
        assert!(store.alerts(true).len() <= 1);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("store.json");

        let store = MemoryStore::new();
        store.register_sensor(Sensor::new("S1", "Wazirabad", 28.71, 77.23));
        store
            .save_baseline(&SensorId::new("S1"), Metric::Ph, &Baseline::from_stats(12, 7.1, 0.2))
            .await
            .unwrap();
        store.upsert_alert(new_alert(Metric::Ph)).await.unwrap();
        store
            .append_reading(&Reading::new("S1", ts(0)).with_value(Metric::Ph, 7.1))
            .await
            .unwrap();
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        let sensor = SensorId::new("S1");
        assert_eq!(loaded.sensors().len(), 1);
        assert_eq!(
            loaded.get_baseline(&sensor, Metric::Ph).await.unwrap().unwrap().count,
            12
        );
        assert!(loaded.find_open_alert(&sensor, Metric::Ph).await.unwrap().is_some());
        assert_eq!(loaded.reading_count(&sensor), 1);

        // ids keep increasing after a reload
        let next = loaded.upsert_alert(new_alert(Metric::Bod)).await.unwrap();
        assert_eq!(next.id, Some(AlertId(2)));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::load(&dir.path().join("absent.json")).unwrap();
        assert!(store.sensors().is_empty());
    }
}
