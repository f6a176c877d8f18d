//! End-to-end pipeline scenarios against the in-memory store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use super::*;
use crate::config::MonitorConfig;
use crate::risk::Intervention;
use crate::severity::Severity;
use crate::store::MemoryStore;

fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

fn setup() -> (Arc<MemoryStore>, MonitorPipeline) {
    let store = Arc::new(MemoryStore::new());
    store.register_sensor(Sensor::new("S1", "Okhla barrage", 28.54, 77.31));
    store.register_sensor(Sensor::new("S2", "Wazirabad", 28.71, 77.23));
    let pipeline = MonitorPipeline::new(store.clone(), &MonitorConfig::default());
    (store, pipeline)
}

fn s1() -> SensorId {
    SensorId::new("S1")
}

fn ph(hour: u32, minute: u32, value: f64) -> Reading {
    Reading::new("S1", ts(hour, minute)).with_value(Metric::Ph, value)
}

async fn seed_ph_baseline(store: &MemoryStore) {
    store
        .save_baseline(&s1(), Metric::Ph, &Baseline::from_stats(50, 7.2, 0.2))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ph_excursion_is_high_and_updates_baseline() {
    let (store, pipeline) = setup();
    seed_ph_baseline(&store).await;

    let outcome = pipeline.ingest(ph(10, 0, 9.0)).await.unwrap();
    assert_eq!(outcome.verdicts.len(), 1);
    assert_eq!(outcome.verdicts[0].severity, Severity::High);
    assert!(matches!(outcome.alerts[0], RecordOutcome::Created(_)));

    let baseline = store.get_baseline(&s1(), Metric::Ph).await.unwrap().unwrap();
    assert_eq!(baseline.count, 51);
    assert!(baseline.mean > 7.2);

    let outcome = pipeline.ingest(ph(10, 5, 7.3)).await.unwrap();
    assert!(outcome.verdicts.is_empty());
    let after = store.get_baseline(&s1(), Metric::Ph).await.unwrap().unwrap();
    assert_eq!(after.count, 52);
    assert_eq!(after.last_timestamp, Some(ts(10, 5)));
}

#[tokio::test]
async fn test_critical_value_leaves_baseline_untouched() {
    let (store, pipeline) = setup();
    let before = Baseline::from_stats(30, 0.4, 0.1);
    store.save_baseline(&s1(), Metric::Ammonia, &before).await.unwrap();

    let reading = Reading::new("S1", ts(9, 0)).with_value(Metric::Ammonia, 3.5);
    let outcome = pipeline.ingest(reading).await.unwrap();

    assert_eq!(outcome.verdicts[0].severity, Severity::Critical);
    let after = store.get_baseline(&s1(), Metric::Ammonia).await.unwrap().unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_reingesting_same_reading_is_noop() {
    let (store, pipeline) = setup();
    seed_ph_baseline(&store).await;

    pipeline.ingest(ph(10, 0, 9.0)).await.unwrap();
    let baseline = store.get_baseline(&s1(), Metric::Ph).await.unwrap();
    let alerts = store.alerts(false);

    let again = pipeline.ingest(ph(10, 0, 9.0)).await.unwrap();
    assert!(again.duplicate);
    assert!(again.verdicts.is_empty());
    assert!(again.risk.is_none());
    assert_eq!(store.get_baseline(&s1(), Metric::Ph).await.unwrap(), baseline);
    assert_eq!(store.alerts(false), alerts);
}

#[tokio::test]
async fn test_out_of_order_readings_are_both_applied() {
    let (store, pipeline) = setup();

    pipeline.ingest(ph(10, 5, 7.4)).await.unwrap();
    let late = pipeline.ingest(ph(10, 0, 7.0)).await.unwrap();
    assert!(!late.duplicate);

    let baseline = store.get_baseline(&s1(), Metric::Ph).await.unwrap().unwrap();
    assert_eq!(baseline.count, 2);
    assert!((baseline.mean - 7.2).abs() < 1e-9);
    assert_eq!(baseline.last_timestamp, Some(ts(10, 5)));
    assert_eq!(store.reading_count(&s1()), 2);
}

#[tokio::test]
async fn test_unknown_sensor_rejected() {
    let (_store, pipeline) = setup();
    let reading = Reading::new("S9", ts(8, 0)).with_value(Metric::Ph, 7.0);

    let result = pipeline.ingest(reading).await;
    assert!(matches!(result, Err(MonitorError::UnknownSensor(id)) if id.as_str() == "S9"));
}

#[tokio::test]
async fn test_invalid_values_skipped_rest_processed() {
    let (store, pipeline) = setup();
    let reading = Reading::new("S1", ts(8, 0))
        .with_value(Metric::Ph, f64::NAN)
        .with_value(Metric::Turbidity, -4.0)
        .with_value(Metric::DissolvedOxygen, 7.5);

    let outcome = pipeline.ingest(reading).await.unwrap();
    let rejected: Vec<Metric> = outcome.rejected.iter().map(|r| r.metric).collect();
    assert_eq!(rejected, vec![Metric::Ph, Metric::Turbidity]);

    assert!(store.get_baseline(&s1(), Metric::Ph).await.unwrap().is_none());
    assert!(store
        .get_baseline(&s1(), Metric::DissolvedOxygen)
        .await
        .unwrap()
        .is_some());
    let stored = store.get_recent_readings(&s1(), 1).await.unwrap();
    assert_eq!(stored[0].value(Metric::Ph), None);
}

#[tokio::test]
async fn test_escalation_keeps_single_open_alert() {
    let (store, pipeline) = setup();

    pipeline.ingest(ph(6, 0, 8.8)).await.unwrap();
    let outcome = pipeline.ingest(ph(6, 15, 9.0)).await.unwrap();

    assert!(matches!(
        outcome.alerts[0],
        RecordOutcome::Escalated {
            previous: Severity::Medium,
            ..
        }
    ));
    let open = store.open_alerts(&s1()).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, Severity::High);
    assert_eq!(open[0].occurrences, 2);
}

#[tokio::test]
async fn test_low_severity_verdict_creates_no_alert() {
    let (store, pipeline) = setup();

    // 0.05 widths above max_safe
    let outcome = pipeline.ingest(ph(6, 0, 8.6)).await.unwrap();
    assert_eq!(outcome.verdicts[0].severity, Severity::Low);
    assert!(outcome.alerts.is_empty());
    assert!(store.alerts(false).is_empty());
}

#[tokio::test]
async fn test_risk_recomputed_on_ingest() {
    let (_store, pipeline) = setup();
    let outcome = pipeline
        .ingest(Reading::new("S1", ts(7, 0)).with_value(Metric::Ammonia, 2.0))
        .await
        .unwrap();

    let risk = outcome.risk.unwrap();
    assert_eq!(risk.readings_considered, 1);
    assert!(risk.components.anomaly_fraction > 0.99);
    assert!(risk.components.alert_pressure > 0.0);
}

#[tokio::test]
async fn test_risk_not_recomputed_when_disabled() {
    let store = Arc::new(MemoryStore::new());
    store.register_sensor(Sensor::new("S1", "Okhla barrage", 28.54, 77.31));
    let mut config = MonitorConfig::default();
    config.pipeline.recompute_risk_on_ingest = false;
    let pipeline = MonitorPipeline::new(store, &config);

    let outcome = pipeline.ingest(ph(7, 0, 7.2)).await.unwrap();
    assert!(outcome.risk.is_none());
}

#[tokio::test]
async fn test_zero_intervention_equals_compute_risk() {
    let (_store, pipeline) = setup();
    for minute in 0..6 {
        let reading = Reading::new("S1", ts(5, minute * 10))
            .with_value(Metric::Bod, 2.0 + minute as f64)
            .with_value(Metric::Ph, 7.1);
        pipeline.ingest(reading).await.unwrap();
    }

    let actual = pipeline.compute_risk(&s1(), 12).await.unwrap();
    let simulated = pipeline
        .simulate_risk(&s1(), 12, &Intervention::none())
        .await
        .unwrap();
    assert_eq!(actual, simulated);

    let reduced = pipeline
        .simulate_risk(&s1(), 12, &Intervention::pollutant_reduction(60.0))
        .await
        .unwrap();
    assert!(reduced.score < actual.score);
    assert!(reduced.components.anomaly_fraction < actual.components.anomaly_fraction);

    // simulation leaves the store alone
    assert_eq!(pipeline.compute_risk(&s1(), 12).await.unwrap(), actual);
}

#[tokio::test]
async fn test_risk_for_unknown_sensor() {
    let (_store, pipeline) = setup();
    let result = pipeline.compute_risk(&SensorId::new("nope"), 6).await;
    assert!(matches!(result, Err(MonitorError::UnknownSensor(_))));
}

#[tokio::test]
async fn test_batch_groups_sorts_and_dedupes() {
    let (store, pipeline) = setup();
    let readings = vec![
        ph(10, 10, 7.2),
        Reading::new("S2", ts(10, 0)).with_value(Metric::DissolvedOxygen, 8.1),
        ph(10, 0, 7.1),
        ph(10, 10, 7.9),
        Reading::new("S7", ts(10, 0)).with_value(Metric::Ph, 7.0),
    ];

    let report = pipeline.ingest_batch(readings).await;

    assert_eq!(report.accepted(), 3);
    assert_eq!(report.batch_duplicates, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].sensor_id.as_str(), "S7");
    assert_eq!(report.risks.len(), 2);

    // first copy of a repeated key wins
    let stored = store.get_recent_readings(&s1(), 10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].value(Metric::Ph), Some(7.2));

    let baseline = store.get_baseline(&s1(), Metric::Ph).await.unwrap().unwrap();
    assert_eq!(baseline.last_timestamp, Some(ts(10, 10)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_single_open_alert() {
    let (store, pipeline) = setup();
    let pipeline = Arc::new(pipeline);

    let mut handles = Vec::new();
    for i in 0..16 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let reading = ph(12, 0, 9.2);
            let reading = Reading {
                timestamp: reading.timestamp + Duration::seconds(i),
                ..reading
            };
            pipeline.ingest(reading).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.warnings.is_empty());
    }

    let open = store.open_alerts(&s1()).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].occurrences, 16);
    assert_eq!(store.reading_count(&s1()), 16);
}

/// Store whose first `failures` alert writes fail with a backend error
struct FailingAlertStore {
    inner: Arc<MemoryStore>,
    failures: AtomicUsize,
}

#[async_trait]
impl MonitorStore for FailingAlertStore {
    async fn get_sensor(&self, id: &SensorId) -> std::result::Result<Sensor, StoreError> {
        self.inner.get_sensor(id).await
    }

    async fn get_baseline(
        &self,
        id: &SensorId,
        metric: Metric,
    ) -> std::result::Result<Option<Baseline>, StoreError> {
        self.inner.get_baseline(id, metric).await
    }

    async fn save_baseline(
        &self,
        id: &SensorId,
        metric: Metric,
        baseline: &Baseline,
    ) -> std::result::Result<(), StoreError> {
        self.inner.save_baseline(id, metric, baseline).await
    }

    async fn find_open_alert(
        &self,
        id: &SensorId,
        metric: Metric,
    ) -> std::result::Result<Option<Alert>, StoreError> {
        self.inner.find_open_alert(id, metric).await
    }

    async fn upsert_alert(&self, alert: Alert) -> std::result::Result<Alert, StoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("alert table unavailable".to_string()));
        }
        self.inner.upsert_alert(alert).await
    }

    async fn open_alerts(&self, id: &SensorId) -> std::result::Result<Vec<Alert>, StoreError> {
        self.inner.open_alerts(id).await
    }

    async fn get_recent_readings(
        &self,
        id: &SensorId,
        limit: usize,
    ) -> std::result::Result<Vec<Reading>, StoreError> {
        self.inner.get_recent_readings(id, limit).await
    }

    async fn has_reading(
        &self,
        id: &SensorId,
        at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError> {
        self.inner.has_reading(id, at).await
    }

    async fn append_reading(&self, reading: &Reading) -> std::result::Result<(), StoreError> {
        self.inner.append_reading(reading).await
    }
}

#[tokio::test]
async fn test_failed_alert_write_leaves_reading_retryable() {
    let (store, _) = setup();
    seed_ph_baseline(&store).await;
    let failing = Arc::new(FailingAlertStore {
        inner: store.clone(),
        failures: AtomicUsize::new(1),
    });
    let pipeline = MonitorPipeline::new(failing, &MonitorConfig::default());

    let result = pipeline.ingest(ph(10, 0, 12.0)).await;
    assert!(matches!(result, Err(MonitorError::Store(StoreError::Backend(_)))));
    assert_eq!(store.reading_count(&s1()), 0);
    let untouched = store.get_baseline(&s1(), Metric::Ph).await.unwrap().unwrap();
    assert_eq!(untouched.count, 50);

    let retried = pipeline.ingest(ph(10, 0, 12.0)).await.unwrap();
    assert!(!retried.duplicate);
    assert!(matches!(retried.alerts[0], RecordOutcome::Created(_)));
    assert_eq!(store.open_alerts(&s1()).await.unwrap().len(), 1);
    assert_eq!(store.reading_count(&s1()), 1);
}

#[tokio::test]
async fn test_reading_older_than_retention_is_duplicate() {
    let store = Arc::new(MemoryStore::with_retention(2));
    store.register_sensor(Sensor::new("S1", "Okhla barrage", 28.54, 77.31));
    let pipeline = MonitorPipeline::new(store.clone(), &MonitorConfig::default());

    for (minute, value) in [(0, 7.2), (5, 7.3), (10, 7.1)] {
        pipeline.ingest(ph(10, minute, value)).await.unwrap();
    }
    assert_eq!(store.reading_count(&s1()), 2);

    let replay = pipeline.ingest(ph(10, 0, 7.2)).await.unwrap();
    assert!(replay.duplicate);
    let baseline = store.get_baseline(&s1(), Metric::Ph).await.unwrap().unwrap();
    assert_eq!(baseline.count, 3);
    assert_eq!(store.reading_count(&s1()), 2);
}

#[tokio::test]
async fn test_statistical_deviation_marks_stored_reading() {
    let (store, pipeline) = setup();
    seed_ph_baseline(&store).await;

    // inside the safe range, 4 standard deviations above the baseline
    let outcome = pipeline.ingest(ph(10, 0, 8.0)).await.unwrap();
    assert!(outcome.verdicts[0].statistical.is_some());
    pipeline.ingest(ph(10, 5, 7.2)).await.unwrap();

    let stored = store.get_recent_readings(&s1(), 2).await.unwrap();
    assert!(stored[0].deviated);
    assert!(!stored[1].deviated);
    let risk = pipeline.compute_risk(&s1(), 6).await.unwrap();
    assert!((risk.components.anomaly_fraction - 0.5).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_quiesced_snapshots_are_consistent() {
    let (store, pipeline) = setup();
    let pipeline = Arc::new(pipeline);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let mut writers = Vec::new();
    for sensor in ["S1", "S2"] {
        let pipeline = pipeline.clone();
        writers.push(tokio::spawn(async move {
            for i in 0..200 {
                let reading = Reading::new(sensor, ts(0, 0) + Duration::seconds(i))
                    .with_value(Metric::Ph, 7.0 + (i % 5) as f64 * 0.05);
                pipeline.ingest(reading).await.unwrap();
            }
        }));
    }

    for _ in 0..20 {
        pipeline.quiesced(|| store.save(&path)).await.unwrap();
        let snapshot = MemoryStore::load(&path).unwrap();
        for sensor in [SensorId::new("S1"), SensorId::new("S2")] {
            let count = snapshot
                .get_baseline(&sensor, Metric::Ph)
                .await
                .unwrap()
                .map(|b| b.count)
                .unwrap_or(0);
            assert_eq!(count as usize, snapshot.reading_count(&sensor));
        }
        tokio::task::yield_now().await;
    }

    for writer in writers {
        writer.await.unwrap();
    }
}
