//! Pipeline configuration
//!
//! Every threshold has a default; a config file and `RIVERMON__*`
//! environment variables override individual fields, e.g.
//! `RIVERMON__DETECTOR__Z_THRESHOLD=2.5` or
//! `RIVERMON__METRICS__PH__MAX_SAFE=9.0`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::anomaly::{AlertConfig, DetectorConfig};
use crate::metric::{Metric, MetricCatalog, SafeRangeOverride};
use crate::risk::RiskConfig;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "RIVERMON";

/// Orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Recompute the sensor's risk score after every ingest
    pub recompute_risk_on_ingest: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recompute_risk_on_ingest: true,
        }
    }
}

/// Complete monitoring configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Per-metric safe range overrides
    pub metrics: HashMap<Metric, SafeRangeOverride>,
    pub detector: DetectorConfig,
    pub alerts: AlertConfig,
    pub risk: RiskConfig,
    pub pipeline: PipelineConfig,
}

impl MonitorConfig {
    /// Load from an optional file (TOML, YAML or JSON by extension) and the
    /// environment; missing fields keep their defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read monitor configuration")?;

        let loaded: MonitorConfig = config
            .try_deserialize()
            .context("Invalid monitor configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Metric catalog with the configured safe range overrides
    pub fn catalog(&self) -> MetricCatalog {
        MetricCatalog::with_overrides(&self.metrics)
    }

    fn validate(&self) -> Result<()> {
        let catalog = self.catalog();
        for spec in catalog.specs() {
            anyhow::ensure!(
                spec.min_safe < spec.max_safe,
                "safe range of {} is empty ({} >= {})",
                spec.metric,
                spec.min_safe,
                spec.max_safe
            );
        }

        let d = &self.detector;
        anyhow::ensure!(
            d.z_threshold > 0.0 && d.z_high >= d.z_threshold,
            "detector z thresholds must satisfy 0 < z_threshold <= z_high"
        );
        anyhow::ensure!(
            d.medium_ratio <= d.high_ratio && d.high_ratio <= d.critical_ratio,
            "detector ratios must be ascending"
        );
        anyhow::ensure!(
            d.alpha > 0.0 && d.alpha <= 1.0,
            "detector alpha must be in (0, 1]"
        );
        anyhow::ensure!(
            self.risk.window_readings > 0,
            "risk window must hold at least one reading"
        );
        Ok(())
    }
}
