//! Alert lifecycle management for anomaly verdicts
//!
//! Handles:
//! - Deduplication: at most one open alert per (sensor, metric)
//! - Escalation of an open alert when a strictly more severe verdict arrives
//! - Suppression of verdicts below the minimum reportable severity
//! - Optimistic write conflicts, retried once with a fresh read

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::detector::AnomalyVerdict;
use crate::error::{MonitorError, StoreError};
use crate::models::Alert;
use crate::severity::Severity;
use crate::store::MonitorStore;

/// Alert manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Verdicts below this severity never produce alerts
    pub min_reportable: Severity,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            min_reportable: Severity::Medium,
        }
    }
}

/// What `record` did with a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// No open alert existed; a new one was opened
    Created(Alert),
    /// The open alert was raised to a higher severity
    Escalated { alert: Alert, previous: Severity },
    /// The open alert already covered this severity; occurrence bumped
    Refreshed(Alert),
    /// Below the minimum reportable severity
    Suppressed,
}

impl RecordOutcome {
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            RecordOutcome::Created(alert)
            | RecordOutcome::Escalated { alert, .. }
            | RecordOutcome::Refreshed(alert) => Some(alert),
            RecordOutcome::Suppressed => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, RecordOutcome::Suppressed)
    }

    pub fn into_alert(self) -> Option<Alert> {
        match self {
            RecordOutcome::Created(alert)
            | RecordOutcome::Escalated { alert, .. }
            | RecordOutcome::Refreshed(alert) => Some(alert),
            RecordOutcome::Suppressed => None,
        }
    }
}

/// Planned write for a verdict, before it reaches the store
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    Create(Alert),
    Escalate(Alert, Severity),
    Refresh(Alert),
}

impl Plan {
    fn alert(&self) -> &Alert {
        match self {
            Plan::Create(alert) | Plan::Escalate(alert, _) | Plan::Refresh(alert) => alert,
        }
    }

    fn into_outcome(self, saved: Alert) -> RecordOutcome {
        match self {
            Plan::Create(_) => RecordOutcome::Created(saved),
            Plan::Escalate(_, previous) => RecordOutcome::Escalated {
                alert: saved,
                previous,
            },
            Plan::Refresh(_) => RecordOutcome::Refreshed(saved),
        }
    }
}

/// Turns anomaly verdicts into deduplicated alert records
#[derive(Debug, Clone, Default)]
pub struct AlertManager {
    config: AlertConfig,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn is_reportable(&self, severity: Severity) -> bool {
        severity >= self.config.min_reportable
    }

    /// Record a verdict against the store
    ///
    /// Looks up the open alert for the verdict's (sensor, metric) key and
    /// either opens, escalates or refreshes it. A write conflict is retried
    /// once after re-reading; a second conflict is returned as
    /// [`MonitorError::ConcurrentAlertConflict`].
    pub async fn record(
        &self,
        store: &dyn MonitorStore,
        verdict: &AnomalyVerdict,
    ) -> Result<RecordOutcome, MonitorError> {
        if !self.is_reportable(verdict.severity) {
            debug!(
                sensor_id = %verdict.sensor_id,
                metric = %verdict.metric,
                severity = %verdict.severity,
                "Verdict below reportable severity, no alert"
            );
            return Ok(RecordOutcome::Suppressed);
        }

        for attempt in 0..2 {
            let existing = store
                .find_open_alert(&verdict.sensor_id, verdict.metric)
                .await?;
            let plan = self.plan(existing.as_ref(), verdict);

            match store.upsert_alert(plan.alert().clone()).await {
                Ok(saved) => return Ok(plan.into_outcome(saved)),
                Err(StoreError::Conflict(reason)) => self.note_conflict(verdict, attempt, &reason),
                Err(e) => return Err(e.into()),
            }
        }

        Err(MonitorError::ConcurrentAlertConflict {
            sensor_id: verdict.sensor_id.clone(),
            metric: verdict.metric,
        })
    }

    fn note_conflict(&self, verdict: &AnomalyVerdict, attempt: u32, reason: &str) {
        if attempt == 0 {
            debug!(
                sensor_id = %verdict.sensor_id,
                metric = %verdict.metric,
                reason = %reason,
                "Alert write conflict, retrying with fresh read"
            );
        } else {
            warn!(
                sensor_id = %verdict.sensor_id,
                metric = %verdict.metric,
                reason = %reason,
                "Alert write conflict persisted after retry"
            );
        }
    }

    fn plan(&self, existing: Option<&Alert>, verdict: &AnomalyVerdict) -> Plan {
        let Some(open) = existing else {
            return Plan::Create(Alert {
                id: None,
                sensor_id: verdict.sensor_id.clone(),
                metric: verdict.metric,
                severity: verdict.severity,
                message: verdict.message.clone(),
                created_at: verdict.timestamp,
                last_seen_at: verdict.timestamp,
                occurrences: 1,
                resolved: false,
                resolved_at: None,
                version: 0,
            });
        };

        let mut next = open.clone();
        next.occurrences = open.occurrences.saturating_add(1);
        next.last_seen_at = open.last_seen_at.max(verdict.timestamp);

        if verdict.severity > open.severity {
            next.severity = verdict.severity;
            next.message = format!("{} (escalated from {})", verdict.message, open.severity);
            Plan::Escalate(next, open.severity)
        } else {
            Plan::Refresh(next)
        }
    }
}
