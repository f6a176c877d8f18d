//! Agent configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Agent configuration, read from `AGENT_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Monitoring station name attached to every log event
    #[serde(default = "default_station_name")]
    pub station_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// NDJSON readings source; `-` reads standard input
    #[serde(default)]
    pub readings_path: Option<String>,

    /// JSON array of sensors registered at startup
    #[serde(default)]
    pub sensors_path: Option<PathBuf>,

    /// Store snapshot loaded at startup and written periodically
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    /// Monitor thresholds file (TOML, YAML or JSON)
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

fn default_station_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_batch_size() -> usize {
    256
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_snapshot_interval() -> u64 {
    60
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AGENT").try_parsing(true))
            .build()?;

        config
            .try_deserialize()
            .context("Invalid AGENT_* configuration")
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }
}
