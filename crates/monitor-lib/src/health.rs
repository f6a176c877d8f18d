//! Liveness and readiness of the monitoring pipeline
//!
//! The ingestion loop, the snapshot writer and the risk engine report into a
//! shared [`HealthRegistry`]; the agent serves its view on `/healthz` and
//! `/readyz`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Parts of the pipeline that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Reading source and batch ingestion
    Ingestion,
    /// Store snapshots
    Store,
    /// Risk recomputation after batches
    RiskEngine,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Ingestion, Component::Store, Component::RiskEngine];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Ingestion => "ingestion",
            Component::Store => "store",
            Component::RiskEngine => "risk_engine",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, with reduced guarantees
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            checked_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across components
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
    /// When the ingestion loop last flushed a batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_batch_at: Option<DateTime<Utc>>,
    pub readings_accepted: u64,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    components: BTreeMap<Component, ComponentHealth>,
    ready: bool,
    last_batch_at: Option<DateTime<Utc>>,
    readings_accepted: u64,
}

/// Shared, cloneable health state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl HealthRegistry {
    /// Empty registry; nothing reports until registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every [`Component`] registered as healthy
    pub async fn with_pipeline_components() -> Self {
        let registry = Self::new();
        for component in Component::ALL {
            registry.set_healthy(component).await;
        }
        registry
    }

    pub async fn update(&self, component: Component, health: ComponentHealth) {
        self.inner.write().await.components.insert(component, health);
    }

    pub async fn set_healthy(&self, component: Component) {
        self.update(component, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.update(component, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.update(component, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.inner.write().await.ready = ready;
    }

    /// Note a flushed ingestion batch
    pub async fn record_batch(&self, accepted: usize, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        inner.last_batch_at = Some(at);
        inner.readings_accepted += accepted as u64;
    }

    pub async fn health(&self) -> HealthResponse {
        let inner = self.inner.read().await;
        let status = inner
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: inner.components.clone(),
            last_batch_at: inner.last_batch_at,
            readings_accepted: inner.readings_accepted,
        }
    }

    /// Ready once startup finished and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let inner = self.inner.read().await;

        let reason = if !inner.ready {
            Some("Pipeline not yet initialized".to_string())
        } else {
            inner
                .components
                .iter()
                .find(|(_, health)| !health.status.is_operational())
                .map(|(component, _)| format!("{component} unhealthy"))
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
