//! Local store snapshot shared by all commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use monitor_lib::{MemoryStore, MonitorConfig, MonitorPipeline, SensorId};
use tracing::debug;

/// Store loaded from disk plus the configuration to run the pipeline with
pub struct Workspace {
    pub store: Arc<MemoryStore>,
    pub config: MonitorConfig,
    path: PathBuf,
}

impl Workspace {
    /// Load the snapshot at `state` (empty if missing) and the monitor config
    pub fn open(state: &Path, config: Option<&Path>) -> Result<Self> {
        let config = MonitorConfig::load(config)?;
        let store = MemoryStore::load(state)
            .with_context(|| format!("Failed to load state {}", state.display()))?;
        debug!(
            path = %state.display(),
            sensors = store.sensors().len(),
            open_alerts = store.alerts(true).len(),
            "Loaded state"
        );

        Ok(Self {
            store: Arc::new(store),
            config,
            path: state.to_path_buf(),
        })
    }

    pub fn pipeline(&self) -> MonitorPipeline {
        MonitorPipeline::new(self.store.clone(), &self.config)
    }

    /// Write the store back to the snapshot file
    pub fn save(&self) -> Result<()> {
        self.store
            .save(&self.path)
            .with_context(|| format!("Failed to write state {}", self.path.display()))?;
        debug!(path = %self.path.display(), "Saved state");
        Ok(())
    }

    /// Fail early with a readable message for unregistered sensors
    pub fn require_sensor(&self, id: &str) -> Result<SensorId> {
        let id = SensorId::new(id);
        if !self.store.sensors().iter().any(|s| s.id == id) {
            anyhow::bail!("Unknown sensor '{id}'. Register it with `rivermon sensors add`");
        }
        Ok(id)
    }
}
